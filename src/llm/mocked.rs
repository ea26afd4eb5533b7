//! Deterministic execution tools for tests, demos and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use ndarray::Array1;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::tools::ExecutionTools;
use super::types::{AvailableModel, EmbeddingResult, ModelVariant, Prompt, PromptResult, PromptTiming, Usage};
use crate::error::ExecutionToolsError;

const ECHO_MODEL: &str = "mocked-echo";
const EMBEDDING_MODEL: &str = "mocked-embedding";

/// Answers every chat and completion prompt with the prompt content itself.
#[derive(Debug, Clone, Default)]
pub struct MockedEchoTools;

impl MockedEchoTools {
    pub fn new() -> Self {
        Self
    }

    fn echo(&self, prompt: &Prompt) -> PromptResult {
        let start = Utc::now();
        let model_name = prompt
            .model_requirements
            .model_name
            .clone()
            .unwrap_or_else(|| ECHO_MODEL.to_string());
        PromptResult {
            content: prompt.content.clone(),
            model_name: model_name.clone(),
            timing: PromptTiming::between(start, Utc::now()),
            usage: Usage::from_texts(&prompt.content, &prompt.content),
            raw_prompt_content: prompt.content.clone(),
            raw_request: json!({ "model": model_name, "content": prompt.content }),
            raw_response: json!({ "content": prompt.content }),
        }
    }
}

#[async_trait]
impl ExecutionTools for MockedEchoTools {
    fn title(&self) -> &str {
        "Mocked echo"
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        matches!(variant, ModelVariant::Chat | ModelVariant::Completion)
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        Ok(vec![
            AvailableModel::new(ECHO_MODEL, ModelVariant::Chat),
            AvailableModel::new(ECHO_MODEL, ModelVariant::Completion),
        ])
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        Ok(self.echo(prompt))
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        Ok(self.echo(prompt))
    }
}

/// Embeds text by hashing words into a fixed number of buckets.
///
/// Equal texts always get equal vectors and texts sharing words point in
/// similar directions, which is all knowledge preparation tests need.
#[derive(Debug, Clone)]
pub struct MockedEmbeddingTools {
    dimension: usize,
}

impl Default for MockedEmbeddingTools {
    fn default() -> Self {
        Self { dimension: 64 }
    }
}

impl MockedEmbeddingTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension.max(1);
        self
    }

    pub fn embed(&self, text: &str) -> Array1<f64> {
        let mut embedding: Array1<f64> = Array1::zeros(self.dimension);
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();
        for word in &words {
            let hash = Sha256::digest(word.as_bytes());
            let bucket = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize % self.dimension;
            let sign = if hash[4] & 1 == 0 { 1.0 } else { -1.0 };
            embedding[bucket] += sign / words.len() as f64;
        }

        let norm = embedding.dot(&embedding).sqrt();
        if norm > 1e-10 {
            embedding.mapv_inplace(|x| x / norm);
        }
        embedding
    }
}

#[async_trait]
impl ExecutionTools for MockedEmbeddingTools {
    fn title(&self) -> &str {
        "Mocked embedding"
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        variant == ModelVariant::Embedding
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        Ok(vec![AvailableModel::new(EMBEDDING_MODEL, ModelVariant::Embedding)])
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        let start = Utc::now();
        let embedding = self.embed(&prompt.content).to_vec();
        Ok(EmbeddingResult {
            model_name: EMBEDDING_MODEL.to_string(),
            timing: PromptTiming::between(start, Utc::now()),
            usage: Usage::from_texts(&prompt.content, ""),
            raw_prompt_content: prompt.content.clone(),
            raw_request: json!({ "model": EMBEDDING_MODEL, "input": prompt.content }),
            raw_response: json!({ "dimension": embedding.len() }),
            embedding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ModelRequirements;

    #[tokio::test]
    async fn test_echo_returns_prompt_content() {
        let prompt = Prompt::new("t", "echo: hello", ModelRequirements::new(ModelVariant::Completion));
        let result = MockedEchoTools::new().call_completion_model(&prompt).await.unwrap();
        assert_eq!(result.content, "echo: hello");
        assert_eq!(result.model_name, "mocked-echo");
        assert_eq!(result.usage.output.words, 2);
    }

    #[tokio::test]
    async fn test_echo_rejects_embeddings() {
        let prompt = Prompt::new("t", "x", ModelRequirements::new(ModelVariant::Embedding));
        let err = MockedEchoTools::new().call_embedding_model(&prompt).await.unwrap_err();
        assert!(matches!(err, ExecutionToolsError::UnsupportedVariant { .. }));
    }

    #[test]
    fn test_embedding_is_deterministic_and_normalized() {
        let tools = MockedEmbeddingTools::new().with_dimension(8);
        let a = tools.embed("Rust is fast");
        let b = tools.embed("rust IS fast");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!((a.dot(&a) - 1.0).abs() < 1e-9);
        assert!(tools.embed("").iter().all(|x| *x == 0.0));
    }
}
