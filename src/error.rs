//! Error types for promptforge operations.
//!
//! Errors follow the lifecycle of a pipeline:
//! - Parsing of the markdown source (`ParsingError`)
//! - Structural validation of the built pipeline (`PipelineLogicError`)
//! - Rendering and execution of templates (`PipelineExecutionError`)
//! - Loading serialized pipelines from another engine version (`VersionMismatchError`)
//! - Backend calls through execution tools (`ExecutionToolsError`)
//! - Knowledge and persona preparation (`KnowledgeError`)
//! - The remote execution protocol (`RemoteError`)
//! - Pipeline collections (`CollectionError`)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::TemplateSyntaxError;
use crate::utils::expectations::ExpectationError;

/// Errors raised while turning markdown source into a pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParsingError {
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Command {command} is not allowed in {place}")]
    UnsupportedUsagePlace { command: String, place: String },

    #[error("Invalid {command} command: {message}")]
    InvalidArgument { command: String, message: String },

    #[error("Malformed placeholder in template '{template}': {source}")]
    MalformedTemplate {
        template: String,
        #[source]
        source: TemplateSyntaxError,
    },

    #[error("Invalid document structure: {0}")]
    Structure(String),

    #[error("Line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ParsingError>,
    },
}

impl ParsingError {
    /// Attach a 1-based source line number to this error.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            ParsingError::AtLine { .. } => self,
            other => ParsingError::AtLine {
                line,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn invalid(command: &str, message: impl Into<String>) -> Self {
        ParsingError::InvalidArgument {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

/// Errors raised when a built pipeline violates a structural invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineLogicError {
    #[error("Parameter name '{0}' is reserved")]
    ReservedParameterName(String),

    #[error("Parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    #[error("Parameter name '{0}' is not a valid identifier")]
    InvalidParameterName(String),

    #[error("Template name '{0}' is used by more than one section")]
    DuplicateTemplateName(String),

    #[error("Template '{template}' depends on '{parameter}' which is neither an input nor produced by any template")]
    MissingParameter { template: String, parameter: String },

    #[error("Parameter '{parameter}' is produced by both '{first}' and '{second}'")]
    ParameterProducedTwice {
        parameter: String,
        first: String,
        second: String,
    },

    #[error("Input parameter '{parameter}' cannot be produced by template '{template}'")]
    InputParameterProduced { parameter: String, template: String },

    #[error("Output parameter '{0}' is never produced")]
    OutputNotProduced(String),

    #[error("Circular dependency between templates: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("Template '{template}' uses persona '{persona}' which is not declared")]
    UnknownPersona { template: String, persona: String },

    #[error("Template '{template}' uses persona '{persona}' but requests a {variant} model; personas require a chat model")]
    PersonaRequiresChat {
        template: String,
        persona: String,
        variant: String,
    },

    #[error("Template '{template}' uses joker '{parameter}' which is not declared")]
    UnknownJoker { template: String, parameter: String },

    #[error("Knowledge source '{0}' is empty")]
    EmptyKnowledgeSource(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),
}

/// Errors raised while rendering or executing templates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineExecutionError {
    #[error("Template rendering failed: {0}")]
    Render(#[from] TemplateSyntaxError),

    #[error("Parameter '{0}' has no value")]
    MissingParameterValue(String),

    #[error("Input parameter '{0}' was not provided")]
    MissingInput(String),

    #[error("Execution tools error: {0}")]
    Tools(#[from] ExecutionToolsError),

    #[error("Expectation not met: {0}")]
    Expectation(#[from] ExpectationError),

    #[error("Postprocessing function '{function}' failed: {message}")]
    Postprocessing { function: String, message: String },

    #[error("No {0} configured for this executor")]
    MissingTools(String),

    #[error("Persona '{0}' is not prepared")]
    UnpreparedPersona(String),

    #[error("Joker pipeline '{url}' failed: {message}")]
    JokerPipeline { url: String, message: String },

    #[error("Preparation failed: {0}")]
    Preparation(String),

    #[error("Template '{template}' failed after {attempts} attempt(s): {source}")]
    TemplateFailed {
        template: String,
        attempts: usize,
        #[source]
        source: Box<PipelineExecutionError>,
    },

    #[error("Execution aborted: {0}")]
    Aborted(String),
}

/// A serialized pipeline was written for an incompatible engine version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Pipeline version {found} is not compatible with engine version {expected}")]
pub struct VersionMismatchError {
    pub expected: String,
    pub found: String,
}

/// Errors returned by execution tools.
///
/// Cloneable so a single in-flight result can be shared by every waiting caller,
/// and serializable so remote callers receive the same variant as local ones.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "camelCase")]
pub enum ExecutionToolsError {
    #[error("{tools} does not support {variant} models")]
    UnsupportedVariant { tools: String, variant: String },

    #[error("No execution tools support {0} models")]
    NoToolsSupport(String),

    #[error("All execution tools failed: {}", .0.join("; "))]
    AllFailed(Vec<String>),

    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Failed to parse backend response: {0}")]
    ParseError(String),

    #[error("Backend response from {0} carries no usage data")]
    MissingUsage(String),

    #[error("Unknown execution tools provider '{0}'")]
    UnknownProvider(String),

    #[error("Invalid execution tools configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("Dialog failed: {0}")]
    Dialog(String),

    #[error("Remote execution failed: {0}")]
    Remote(String),
}

/// Errors raised while preparing knowledge and personas.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Failed to fetch '{source_name}': {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    #[error("Failed to read '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Knowledge source '{0}' produced no content")]
    EmptyContent(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] ExecutionToolsError),

    #[error("No chat model is available to prepare persona '{0}'")]
    NoChatModel(String),
}

/// Errors raised by the remote execution client and server.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error: {0}")]
    Server(String),
}

/// Errors raised by pipeline collections.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Pipeline '{0}' has no URL and cannot join a collection")]
    MissingUrl(String),

    #[error("Pipeline URL '{0}' appears more than once in the collection")]
    DuplicateUrl(String),

    #[error("No pipeline with URL '{0}'")]
    NotFound(String),

    #[error("Failed to compile '{path}': {message}")]
    Compile { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for callers that drive the whole lifecycle.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error(transparent)]
    Parsing(#[from] ParsingError),

    #[error(transparent)]
    Logic(#[from] PipelineLogicError),

    #[error(transparent)]
    Execution(#[from] PipelineExecutionError),

    #[error(transparent)]
    VersionMismatch(#[from] VersionMismatchError),

    #[error(transparent)]
    Tools(#[from] ExecutionToolsError),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_line_wraps_once() {
        let err = ParsingError::UnknownCommand("FOO".to_string())
            .at_line(3)
            .at_line(7);
        assert_eq!(err.to_string(), "Line 3: Unknown command 'FOO'");
    }

    #[test]
    fn test_circular_dependency_message() {
        let err = PipelineLogicError::CircularDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(
            err.to_string(),
            "Circular dependency between templates: a -> b -> a"
        );
    }

    #[test]
    fn test_tools_error_converts_into_execution_error() {
        let err: PipelineExecutionError = ExecutionToolsError::MissingUsage("gpt".into()).into();
        assert!(matches!(err, PipelineExecutionError::Tools(_)));
    }
}
