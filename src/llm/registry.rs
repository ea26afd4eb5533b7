//! Explicit registry of execution tools providers.
//!
//! Built once at startup and passed to whatever needs to turn configuration
//! into tools (the CLI and the remote server).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::mocked::{MockedEchoTools, MockedEmbeddingTools};
use super::multiple::join_execution_tools;
use super::openai::{OpenAiCompatibleOptions, OpenAiCompatibleTools};
use super::remote::{RemoteExecutionTools, RemoteToolsOptions};
use super::tools::SharedExecutionTools;
use crate::error::ExecutionToolsError;

/// Builds tools from the free-form options of one configuration entry.
pub type ToolsConstructor = fn(&Value) -> Result<SharedExecutionTools, ExecutionToolsError>;

/// One provider entry as it appears in configuration files and remote requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfiguration {
    pub provider: String,
    #[serde(default)]
    pub options: Value,
}

impl ToolsConfiguration {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Default)]
pub struct ExecutionToolsRegistry {
    constructors: BTreeMap<String, ToolsConstructor>,
}

impl ExecutionToolsRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every provider shipped in this crate.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_provider("openai-compatible", create_openai_compatible)
            .with_provider("mocked-echo", create_mocked_echo)
            .with_provider("mocked-embedding", create_mocked_embedding)
            .with_provider("remote", create_remote)
    }

    /// Add or replace the constructor for `provider`.
    pub fn with_provider(mut self, provider: impl Into<String>, constructor: ToolsConstructor) -> Self {
        self.constructors.insert(provider.into(), constructor);
        self
    }

    pub fn providers(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn create(&self, configuration: &ToolsConfiguration) -> Result<SharedExecutionTools, ExecutionToolsError> {
        let constructor = self
            .constructors
            .get(&configuration.provider)
            .ok_or_else(|| ExecutionToolsError::UnknownProvider(configuration.provider.clone()))?;
        tracing::debug!(provider = %configuration.provider, "Creating execution tools");
        constructor(&configuration.options)
    }

    /// Tools for every entry, composed in order when there is more than one.
    pub fn create_from_configuration(
        &self,
        configuration: &[ToolsConfiguration],
    ) -> Result<SharedExecutionTools, ExecutionToolsError> {
        if configuration.is_empty() {
            return Err(ExecutionToolsError::InvalidConfiguration(
                "no execution tools configured".to_string(),
            ));
        }
        let members = configuration
            .iter()
            .map(|entry| self.create(entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(join_execution_tools(members))
    }
}

fn options_or_default<T>(options: &Value) -> Result<T, ExecutionToolsError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone()).map_err(|e| ExecutionToolsError::InvalidConfiguration(e.to_string()))
}

fn create_openai_compatible(options: &Value) -> Result<SharedExecutionTools, ExecutionToolsError> {
    let options: OpenAiCompatibleOptions = if options.is_null() {
        OpenAiCompatibleOptions::from_env()
    } else {
        options_or_default(options)?
    };
    Ok(Arc::new(OpenAiCompatibleTools::new(options)?))
}

fn create_mocked_echo(_options: &Value) -> Result<SharedExecutionTools, ExecutionToolsError> {
    Ok(Arc::new(MockedEchoTools::new()))
}

fn create_mocked_embedding(options: &Value) -> Result<SharedExecutionTools, ExecutionToolsError> {
    let tools = match options.get("dimension").and_then(Value::as_u64) {
        Some(dimension) => MockedEmbeddingTools::new().with_dimension(dimension as usize),
        None => MockedEmbeddingTools::new(),
    };
    Ok(Arc::new(tools))
}

fn create_remote(options: &Value) -> Result<SharedExecutionTools, ExecutionToolsError> {
    let options: RemoteToolsOptions = options_or_default(options)?;
    Ok(Arc::new(RemoteExecutionTools::new(options)))
}
