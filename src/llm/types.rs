//! Values exchanged with execution tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use crate::template::Parameters;
use crate::utils::{ExpectFormat, Expectations, UsageCounts};

/// Kind of model a prompt is addressed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelVariant {
    #[default]
    Chat,
    Completion,
    Embedding,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Chat => "CHAT",
            ModelVariant::Completion => "COMPLETION",
            ModelVariant::Embedding => "EMBEDDING",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CHAT" => Ok(ModelVariant::Chat),
            "COMPLETION" => Ok(ModelVariant::Completion),
            "EMBEDDING" => Ok(ModelVariant::Embedding),
            other => Err(format!("unknown model variant '{other}'")),
        }
    }
}

/// What a template or persona needs from the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequirements {
    #[serde(default)]
    pub model_variant: ModelVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelRequirements {
    pub fn new(model_variant: ModelVariant) -> Self {
        Self {
            model_variant,
            ..Default::default()
        }
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }

    /// Fields set on `overrides` replace the ones set here; the variant always comes from `overrides`.
    pub fn merged_with(&self, overrides: &ModelRequirements) -> ModelRequirements {
        ModelRequirements {
            model_variant: overrides.model_variant,
            model_name: overrides.model_name.clone().or_else(|| self.model_name.clone()),
            system_message: overrides
                .system_message
                .clone()
                .or_else(|| self.system_message.clone()),
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
        }
    }
}

/// One rendered request to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub model_requirements: ModelRequirements,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessing_function_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations: Option<Expectations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ExpectFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
}

impl Prompt {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        model_requirements: ModelRequirements,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            parameters: Parameters::new(),
            model_requirements,
            postprocessing_function_names: Vec::new(),
            expectations: None,
            format: None,
            pipeline_url: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_pipeline_url(mut self, pipeline_url: Option<String>) -> Self {
        self.pipeline_url = pipeline_url;
        self
    }

    pub fn variant(&self) -> ModelVariant {
        self.model_requirements.model_variant
    }
}

/// Wall-clock timing of one backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTiming {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_token: Option<DateTime<Utc>>,
    pub complete: DateTime<Utc>,
}

impl PromptTiming {
    pub fn between(start: DateTime<Utc>, complete: DateTime<Utc>) -> Self {
        Self {
            start,
            first_token: None,
            complete,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.complete - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Cost and size of one or more backend calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub input: UsageCounts,
    #[serde(default)]
    pub output: UsageCounts,
}

impl Usage {
    /// Usage measured from texts alone, without token counts.
    pub fn from_texts(input: &str, output: &str) -> Self {
        Self {
            price: None,
            input_tokens: None,
            output_tokens: None,
            input: UsageCounts::of(input),
            output: UsageCounts::of(output),
        }
    }
}

fn add_optional<T: std::ops::Add<Output = T>>(left: Option<T>, right: Option<T>) -> Option<T> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l + r),
        (l, None) => l,
        (None, r) => r,
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, other: &Usage) {
        self.price = add_optional(self.price, other.price);
        self.input_tokens = add_optional(self.input_tokens, other.input_tokens);
        self.output_tokens = add_optional(self.output_tokens, other.output_tokens);
        self.input += other.input;
        self.output += other.output;
    }
}

/// Result of a chat or completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub content: String,
    pub model_name: String,
    pub timing: PromptTiming,
    pub usage: Usage,
    pub raw_prompt_content: String,
    #[serde(default)]
    pub raw_request: serde_json::Value,
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

/// Result of an embedding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    pub embedding: Vec<f64>,
    pub model_name: String,
    pub timing: PromptTiming,
    pub usage: Usage,
    pub raw_prompt_content: String,
    #[serde(default)]
    pub raw_request: serde_json::Value,
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

/// Either kind of model result, as cached and sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ModelCallResult {
    Text(PromptResult),
    Embedding(EmbeddingResult),
}

impl ModelCallResult {
    pub fn model_name(&self) -> &str {
        match self {
            ModelCallResult::Text(result) => &result.model_name,
            ModelCallResult::Embedding(result) => &result.model_name,
        }
    }
}

/// A model offered by execution tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModel {
    pub model_title: String,
    pub model_name: String,
    pub model_variant: ModelVariant,
}

impl AvailableModel {
    pub fn new(model_name: impl Into<String>, model_variant: ModelVariant) -> Self {
        let model_name = model_name.into();
        Self {
            model_title: model_name.clone(),
            model_name,
            model_variant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_variant_parse_and_display() {
        assert_eq!("chat".parse::<ModelVariant>(), Ok(ModelVariant::Chat));
        assert_eq!(ModelVariant::Embedding.to_string(), "EMBEDDING");
        assert!("vision".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn test_requirements_merge_prefers_overrides() {
        let defaults = ModelRequirements::new(ModelVariant::Chat)
            .with_model_name("base")
            .with_system_message("be brief");
        let overrides = ModelRequirements::new(ModelVariant::Completion).with_model_name("special");
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.model_variant, ModelVariant::Completion);
        assert_eq!(merged.model_name.as_deref(), Some("special"));
        assert_eq!(merged.system_message.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = Usage::default();
        let mut first = Usage::from_texts("a b", "c");
        first.input_tokens = Some(3);
        total += &first;
        total += &Usage::from_texts("d", "e f");
        assert_eq!(total.input_tokens, Some(3));
        assert_eq!(total.input.words, 3);
        assert_eq!(total.output.words, 3);
    }

    #[test]
    fn test_model_call_result_is_tagged() {
        let now = Utc::now();
        let result = ModelCallResult::Embedding(EmbeddingResult {
            embedding: vec![0.5],
            model_name: "e".into(),
            timing: PromptTiming::between(now, now),
            usage: Usage::default(),
            raw_prompt_content: "x".into(),
            raw_request: serde_json::Value::Null,
            raw_response: serde_json::Value::Null,
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "embedding");
        let back: ModelCallResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
