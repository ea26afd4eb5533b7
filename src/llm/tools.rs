//! The execution tools interface every backend implements.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::types::{AvailableModel, EmbeddingResult, ModelCallResult, ModelVariant, Prompt, PromptResult};
use crate::error::ExecutionToolsError;
use crate::metrics::MetricsCollector;

/// A backend able to answer prompts.
///
/// Implementations override the call methods for the variants they support;
/// the defaults reject the call with [`ExecutionToolsError::UnsupportedVariant`].
#[async_trait]
pub trait ExecutionTools: Send + Sync {
    /// Human readable name used in logs and errors.
    fn title(&self) -> &str;

    /// Whether a call for `variant` can succeed at all.
    fn supports_variant(&self, variant: ModelVariant) -> bool;

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError>;

    async fn call_chat_model(&self, _prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        Err(unsupported(self.title(), ModelVariant::Chat))
    }

    async fn call_completion_model(&self, _prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        Err(unsupported(self.title(), ModelVariant::Completion))
    }

    async fn call_embedding_model(&self, _prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        Err(unsupported(self.title(), ModelVariant::Embedding))
    }
}

/// Execution tools shared between the executor, caches and composites.
pub type SharedExecutionTools = Arc<dyn ExecutionTools>;

pub fn unsupported(tools: &str, variant: ModelVariant) -> ExecutionToolsError {
    ExecutionToolsError::UnsupportedVariant {
        tools: tools.to_string(),
        variant: variant.to_string(),
    }
}

/// Dispatch `prompt` to the call method matching its model variant.
pub async fn call_model(
    tools: &dyn ExecutionTools,
    prompt: &Prompt,
) -> Result<ModelCallResult, ExecutionToolsError> {
    let variant = prompt.variant();
    let started = Instant::now();
    let result = match variant {
        ModelVariant::Chat => tools.call_chat_model(prompt).await.map(ModelCallResult::Text),
        ModelVariant::Completion => tools
            .call_completion_model(prompt)
            .await
            .map(ModelCallResult::Text),
        ModelVariant::Embedding => tools
            .call_embedding_model(prompt)
            .await
            .map(ModelCallResult::Embedding),
    };
    MetricsCollector::new().record_prompt_call(
        variant.as_str(),
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );
    result
}

/// Unwrap a text result, rejecting embeddings.
pub fn expect_text(result: ModelCallResult) -> Result<PromptResult, ExecutionToolsError> {
    match result {
        ModelCallResult::Text(result) => Ok(result),
        ModelCallResult::Embedding(result) => Err(ExecutionToolsError::ParseError(format!(
            "expected a text result from {}, got an embedding",
            result.model_name
        ))),
    }
}

/// Unwrap an embedding result, rejecting text.
pub fn expect_embedding(result: ModelCallResult) -> Result<EmbeddingResult, ExecutionToolsError> {
    match result {
        ModelCallResult::Embedding(result) => Ok(result),
        ModelCallResult::Text(result) => Err(ExecutionToolsError::ParseError(format!(
            "expected an embedding from {}, got text",
            result.model_name
        ))),
    }
}
