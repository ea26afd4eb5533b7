//! The pipeline intermediate representation.
//!
//! A [`Pipeline`] is what the builder produces from markdown source and what
//! the executor runs. It serializes to a stable JSON document (see
//! [`super::serialize`]), field names in camelCase.

use serde::{Deserialize, Serialize};

use crate::llm::{ModelRequirements, ModelVariant, Usage};
use crate::utils::{ExpectFormat, Expectations};

/// Version of the pipeline format this engine reads and writes.
pub const BOOK_VERSION: &str = "1.0.0";

/// Names provided by the executor at run time; never declarable by users.
pub const RESERVED_PARAMETER_NAMES: &[&str] = &[
    "content",
    "context",
    "knowledge",
    "samples",
    "modelName",
    "currentDate",
];

pub fn is_reserved_parameter_name(name: &str) -> bool {
    RESERVED_PARAMETER_NAMES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    pub book_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model_requirements: Option<ModelRequirements>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub knowledge_sources: Vec<KnowledgeSource>,
    #[serde(default)]
    pub knowledge_pieces: Vec<KnowledgePiece>,
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub preparations: Vec<Preparation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<String>,
}

impl Pipeline {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            pipeline_url: None,
            book_version: BOOK_VERSION.to_string(),
            description: None,
            default_model_requirements: None,
            parameters: Vec::new(),
            templates: Vec::new(),
            knowledge_sources: Vec::new(),
            knowledge_pieces: Vec::new(),
            personas: Vec::new(),
            preparations: Vec::new(),
            instruments: Vec::new(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn input_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_input)
    }

    pub fn output_parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_output)
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn persona(&self, name: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.name() == name)
    }

    /// Requirements a template runs with: pipeline defaults overlaid by the template's own.
    pub fn effective_model_requirements(&self, template: &Template) -> ModelRequirements {
        let defaults = self.default_model_requirements.clone().unwrap_or_default();
        match &template.model_requirements {
            Some(own) => defaults.merged_with(own),
            None => defaults,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub is_output: bool,
}

impl Parameter {
    pub fn intermediate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            is_input: false,
            is_output: false,
        }
    }
}

/// How a template produces its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    /// Rendered and sent to a model.
    #[default]
    #[serde(rename = "PROMPT_TEMPLATE")]
    Prompt,
    /// Rendered locally; the rendered text is the result.
    #[serde(rename = "SIMPLE_TEMPLATE")]
    Simple,
    /// Run by script execution tools.
    #[serde(rename = "SCRIPT_TEMPLATE")]
    Script,
    /// Answered by a person through user interface tools.
    #[serde(rename = "DIALOG_TEMPLATE")]
    Dialog,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Prompt => "PROMPT_TEMPLATE",
            TemplateKind::Simple => "SIMPLE_TEMPLATE",
            TemplateKind::Script => "SCRIPT_TEMPLATE",
            TemplateKind::Dialog => "DIALOG_TEMPLATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "templateType", default)]
    pub kind: TemplateKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    pub resulting_parameter_name: String,
    #[serde(default)]
    pub dependent_parameter_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joker_parameter_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joker_pipeline_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessing_function_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Expectations::is_empty")]
    pub expectations: Expectations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ExpectFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_requirements: Option<ModelRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<String>,
}

impl Template {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: None,
            kind: TemplateKind::Prompt,
            content: String::new(),
            content_language: None,
            resulting_parameter_name: String::new(),
            dependent_parameter_names: Vec::new(),
            joker_parameter_names: Vec::new(),
            joker_pipeline_url: None,
            postprocessing_function_names: Vec::new(),
            expectations: Expectations::default(),
            format: None,
            model_requirements: None,
            persona_name: None,
            instruments: Vec::new(),
        }
    }
}

/// A raw knowledge reference: URL, file path, directory or inline text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSource {
    pub name: String,
    pub source_content: String,
    /// Set when the source was declared inside a template section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePieceSource {
    /// Name of the [`KnowledgeSource`] this piece came from.
    pub name: String,
    /// URL or path the content was read from.
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingIndex {
    pub model_name: String,
    pub position: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePiece {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<KnowledgePieceSource>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub index: Vec<EmbeddingIndex>,
    #[serde(default)]
    pub preparation_ids: Vec<String>,
}

impl KnowledgePiece {
    /// Prepared once it has an embedding and a preparation record.
    pub fn is_prepared(&self) -> bool {
        !self.index.is_empty() && !self.preparation_ids.is_empty()
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|source| source.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPersona {
    pub name: String,
    pub description: String,
    pub model_requirements: ModelRequirements,
    pub preparation_ids: Vec<String>,
}

impl PreparedPersona {
    pub fn system_message(&self) -> String {
        if self.description.is_empty() {
            format!("You are {}.", self.name)
        } else {
            format!("You are {}, {}", self.name, self.description)
        }
    }
}

/// A persona before or after preparation.
///
/// Only `Prepared` personas carry model requirements, so executing a template
/// against a `Raw` persona is a type-level impossibility for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Persona {
    Raw(PersonaDefinition),
    Prepared(PreparedPersona),
}

impl Persona {
    pub fn raw(name: impl Into<String>, description: impl Into<String>) -> Self {
        Persona::Raw(PersonaDefinition {
            name: name.into(),
            description: description.into(),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Persona::Raw(definition) => &definition.name,
            Persona::Prepared(prepared) => &prepared.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Persona::Raw(definition) => &definition.description,
            Persona::Prepared(prepared) => &prepared.description,
        }
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self, Persona::Prepared(_))
    }
}

/// Audit record of one preparation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preparation {
    pub id: String,
    pub book_version: String,
    #[serde(default)]
    pub usage: Usage,
}

/// Whether a template's persona and requirements combination is allowed.
pub fn persona_allowed_for(variant: ModelVariant) -> bool {
    variant == ModelVariant::Chat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_is_tagged_by_state() {
        let persona = Persona::raw("Ada", "a precise engineer");
        let json = serde_json::to_value(&persona).unwrap();
        assert_eq!(json["state"], "raw");
        assert_eq!(json["name"], "Ada");
        let back: Persona = serde_json::from_value(json).unwrap();
        assert_eq!(back, persona);
    }

    #[test]
    fn test_template_kind_wire_names() {
        let json = serde_json::to_string(&TemplateKind::Simple).unwrap();
        assert_eq!(json, "\"SIMPLE_TEMPLATE\"");
    }

    #[test]
    fn test_knowledge_piece_preparedness() {
        let mut piece = KnowledgePiece {
            name: "p".into(),
            title: None,
            content: "text".into(),
            sources: Vec::new(),
            keywords: Vec::new(),
            index: Vec::new(),
            preparation_ids: vec!["prep".into()],
        };
        assert!(!piece.is_prepared());
        piece.index.push(EmbeddingIndex {
            model_name: "m".into(),
            position: vec![0.0],
        });
        assert!(piece.is_prepared());
    }

    #[test]
    fn test_effective_requirements_overlay() {
        let mut pipeline = Pipeline::new("t");
        pipeline.default_model_requirements =
            Some(ModelRequirements::new(ModelVariant::Chat).with_model_name("base"));
        let mut template = Template::new("a", "A");
        assert_eq!(
            pipeline.effective_model_requirements(&template).model_name.as_deref(),
            Some("base")
        );
        template.model_requirements = Some(ModelRequirements::new(ModelVariant::Completion));
        let effective = pipeline.effective_model_requirements(&template);
        assert_eq!(effective.model_variant, ModelVariant::Completion);
        assert_eq!(effective.model_name.as_deref(), Some("base"));
    }
}
