//! Execution tools for OpenAI-compatible HTTP APIs.
//!
//! Works against OpenAI itself, LiteLLM proxies, OpenRouter and local servers
//! exposing the same `/chat/completions`, `/completions`, `/embeddings` and
//! `/models` endpoints.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::env;
use std::time::Duration;

use super::tools::ExecutionTools;
use super::types::{
    AvailableModel, EmbeddingResult, ModelVariant, Prompt, PromptResult, PromptTiming, Usage,
};
use crate::error::ExecutionToolsError;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo-instruct";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Connection settings, deserializable from a tools configuration's options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiCompatibleOptions {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub default_chat_model: String,
    #[serde(default = "default_completion_model")]
    pub default_completion_model: String,
    #[serde(default = "default_embedding_model")]
    pub default_embedding_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_completion_model() -> String {
    DEFAULT_COMPLETION_MODEL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for OpenAiCompatibleOptions {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            default_chat_model: default_chat_model(),
            default_completion_model: default_completion_model(),
            default_embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl OpenAiCompatibleOptions {
    /// Read options from the environment.
    ///
    /// - `OPENAI_API_BASE`: Base URL (defaults to the OpenAI API)
    /// - `OPENAI_API_KEY`: API key (optional for local servers)
    /// - `OPENAI_DEFAULT_MODEL`: Default chat model
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(api_base) = env::var("OPENAI_API_BASE") {
            options.api_base = api_base;
        }
        options.api_key = env::var("OPENAI_API_KEY").ok();
        if let Ok(model) = env::var("OPENAI_DEFAULT_MODEL") {
            options.default_chat_model = model;
        }
        options
    }
}

/// A message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    model: String,
    choices: Vec<CompletionChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    model: String,
    data: Vec<EmbeddingData>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

pub struct OpenAiCompatibleTools {
    options: OpenAiCompatibleOptions,
    http_client: Client,
}

impl OpenAiCompatibleTools {
    pub fn new(options: OpenAiCompatibleOptions) -> Result<Self, ExecutionToolsError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| ExecutionToolsError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            options,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, ExecutionToolsError> {
        Self::new(OpenAiCompatibleOptions::from_env())
    }

    pub fn api_base(&self) -> &str {
        &self.options.api_base
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<serde_json::Value, ExecutionToolsError> {
        let url = format!("{}/{}", self.options.api_base.trim_end_matches('/'), path);

        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Title", "promptforge");

        if let Some(ref api_key) = self.options.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(body)
            .send()
            .await
            .map_err(|e| ExecutionToolsError::RequestFailed(e.to_string()))?;

        Self::read_body(http_response).await
    }

    async fn read_body(http_response: reqwest::Response) -> Result<serde_json::Value, ExecutionToolsError> {
        let status = http_response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|response| response.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(ExecutionToolsError::RateLimited(message));
            }
            return Err(ExecutionToolsError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json()
            .await
            .map_err(|e| ExecutionToolsError::ParseError(format!("Failed to parse API response: {}", e)))
    }

    fn model_for(&self, prompt: &Prompt, fallback: &str) -> String {
        prompt
            .model_requirements
            .model_name
            .clone()
            .unwrap_or_else(|| fallback.to_string())
    }
}

fn parse<T: for<'de> Deserialize<'de>>(raw: &serde_json::Value) -> Result<T, ExecutionToolsError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| ExecutionToolsError::ParseError(format!("Unexpected response shape: {}", e)))
}

fn usage_for(model: &str, usage: Option<ApiUsage>, input: &str, output: &str) -> Result<Usage, ExecutionToolsError> {
    let usage = usage.ok_or_else(|| ExecutionToolsError::MissingUsage(model.to_string()))?;
    Ok(Usage {
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
        ..Usage::from_texts(input, output)
    })
}

#[async_trait]
impl ExecutionTools for OpenAiCompatibleTools {
    fn title(&self) -> &str {
        "OpenAI compatible"
    }

    fn supports_variant(&self, _variant: ModelVariant) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        let url = format!("{}/models", self.options.api_base.trim_end_matches('/'));
        let mut http_request = self.http_client.get(&url);
        if let Some(ref api_key) = self.options.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }
        let http_response = http_request
            .send()
            .await
            .map_err(|e| ExecutionToolsError::RequestFailed(e.to_string()))?;
        let raw = Self::read_body(http_response).await?;
        let models: ModelsResponse = parse(&raw)?;

        Ok(models
            .data
            .into_iter()
            .map(|model| {
                let variant = if model.id.contains("embedding") {
                    ModelVariant::Embedding
                } else if model.id.contains("instruct") {
                    ModelVariant::Completion
                } else {
                    ModelVariant::Chat
                };
                AvailableModel::new(model.id, variant)
            })
            .collect())
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        let start = Utc::now();
        let model = self.model_for(prompt, &self.options.default_chat_model);

        let mut messages = Vec::new();
        if let Some(system) = &prompt.model_requirements.system_message {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt.content.clone()));

        let request = ChatRequest {
            model: model.clone(),
            messages,
            temperature: prompt.model_requirements.temperature,
            max_tokens: prompt.model_requirements.max_tokens,
        };
        let raw_response = self.post("chat/completions", &request).await?;
        let response: ChatResponse = parse(&raw_response)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExecutionToolsError::ParseError("response has no message content".to_string()))?;

        Ok(PromptResult {
            usage: usage_for(&response.model, response.usage, &prompt.content, &content)?,
            content,
            model_name: response.model,
            timing: PromptTiming::between(start, Utc::now()),
            raw_prompt_content: prompt.content.clone(),
            raw_request: json!(request),
            raw_response,
        })
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        let start = Utc::now();
        let request = CompletionRequest {
            model: self.model_for(prompt, &self.options.default_completion_model),
            prompt: prompt.content.clone(),
            temperature: prompt.model_requirements.temperature,
            max_tokens: prompt.model_requirements.max_tokens,
        };
        let raw_response = self.post("completions", &request).await?;
        let response: CompletionResponse = parse(&raw_response)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| ExecutionToolsError::ParseError("response has no choices".to_string()))?;

        Ok(PromptResult {
            usage: usage_for(&response.model, response.usage, &prompt.content, &content)?,
            content,
            model_name: response.model,
            timing: PromptTiming::between(start, Utc::now()),
            raw_prompt_content: prompt.content.clone(),
            raw_request: json!(request),
            raw_response,
        })
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        let start = Utc::now();
        let request = EmbeddingRequest {
            model: self.model_for(prompt, &self.options.default_embedding_model),
            input: prompt.content.clone(),
        };
        let raw_response = self.post("embeddings", &request).await?;
        let response: EmbeddingResponse = parse(&raw_response)?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ExecutionToolsError::ParseError("response has no embedding".to_string()))?;

        Ok(EmbeddingResult {
            embedding,
            usage: usage_for(&response.model, response.usage, &prompt.content, "")?,
            model_name: response.model,
            timing: PromptTiming::between(start, Utc::now()),
            raw_prompt_content: prompt.content.clone(),
            raw_request: json!(request),
            raw_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_from_empty_json() {
        let options: OpenAiCompatibleOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options.api_base, "https://api.openai.com/v1");
        assert_eq!(options.default_chat_model, "gpt-4o-mini");
        assert_eq!(options.timeout_secs, 120);
    }

    #[test]
    fn test_options_camel_case() {
        let options: OpenAiCompatibleOptions = serde_json::from_value(json!({
            "apiBase": "http://localhost:4000",
            "apiKey": "sk-test",
        }))
        .unwrap();
        assert_eq!(options.api_base, "http://localhost:4000");
        assert_eq!(options.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_usage_is_an_error() {
        let err = usage_for("gpt", None, "in", "out").unwrap_err();
        assert_eq!(err, ExecutionToolsError::MissingUsage("gpt".into()));
    }

    #[test]
    fn test_usage_carries_tokens_and_counts() {
        let usage = usage_for(
            "gpt",
            Some(ApiUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            }),
            "one two",
            "three",
        )
        .unwrap();
        assert_eq!(usage.input_tokens, Some(7));
        assert_eq!(usage.output.words, 1);
        assert_eq!(usage.input.words, 2);
    }

    #[test]
    fn test_chat_response_shape() {
        let raw = json!({
            "id": "x",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        });
        let response: ChatResponse = parse(&raw).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi"));
        assert!(response.usage.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_failure() {
        let tools = OpenAiCompatibleTools::new(OpenAiCompatibleOptions {
            api_base: "http://127.0.0.1:9".into(),
            timeout_secs: 2,
            ..OpenAiCompatibleOptions::default()
        })
        .unwrap();
        let prompt = Prompt::new(
            "t",
            "hi",
            crate::llm::types::ModelRequirements::new(ModelVariant::Chat),
        );
        let err = tools.call_chat_model(&prompt).await.unwrap_err();
        assert!(matches!(err, ExecutionToolsError::RequestFailed(_)));
    }
}
