//! Composition of several execution tools behind one interface.
//!
//! Members are tried in order. The first member that supports the requested
//! variant and answers wins; a failing member hands over to the next one.

use async_trait::async_trait;
use std::sync::Arc;

use super::tools::{call_model, expect_embedding, expect_text, ExecutionTools, SharedExecutionTools};
use super::types::{AvailableModel, EmbeddingResult, ModelCallResult, ModelVariant, Prompt, PromptResult};
use crate::error::ExecutionToolsError;

pub struct MultipleExecutionTools {
    title: String,
    members: Vec<SharedExecutionTools>,
}

impl MultipleExecutionTools {
    pub fn new(members: Vec<SharedExecutionTools>) -> Self {
        let title = members
            .iter()
            .map(|member| member.title())
            .collect::<Vec<_>>()
            .join(" + ");
        Self { title, members }
    }

    pub fn members(&self) -> &[SharedExecutionTools] {
        &self.members
    }

    async fn dispatch(&self, prompt: &Prompt) -> Result<ModelCallResult, ExecutionToolsError> {
        let variant = prompt.variant();
        let mut failures: Vec<(String, ExecutionToolsError)> = Vec::new();

        for member in self.members.iter().filter(|m| m.supports_variant(variant)) {
            match call_model(member.as_ref(), prompt).await {
                Ok(result) => return Ok(result),
                Err(ExecutionToolsError::UnsupportedVariant { .. }) => continue,
                Err(e) => {
                    tracing::warn!(
                        tools = member.title(),
                        error = %e,
                        "Execution tools failed, trying next member"
                    );
                    failures.push((member.title().to_string(), e));
                }
            }
        }

        match failures.len() {
            0 => Err(ExecutionToolsError::NoToolsSupport(variant.to_string())),
            1 => Err(failures.remove(0).1),
            _ => Err(ExecutionToolsError::AllFailed(
                failures
                    .into_iter()
                    .map(|(title, e)| format!("{title}: {e}"))
                    .collect(),
            )),
        }
    }
}

#[async_trait]
impl ExecutionTools for MultipleExecutionTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        self.members.iter().any(|m| m.supports_variant(variant))
    }

    /// Models of every member; a member that cannot list is skipped.
    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        let mut models = Vec::new();
        for member in &self.members {
            match member.list_models().await {
                Ok(listed) => models.extend(listed),
                Err(e) => tracing::warn!(tools = member.title(), error = %e, "Failed to list models"),
            }
        }
        Ok(models)
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.dispatch(prompt).await?)
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.dispatch(prompt).await?)
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        expect_embedding(self.dispatch(prompt).await?)
    }
}

/// One member is used as is; several are composed.
pub fn join_execution_tools(mut members: Vec<SharedExecutionTools>) -> SharedExecutionTools {
    if members.len() == 1 {
        members.remove(0)
    } else {
        Arc::new(MultipleExecutionTools::new(members))
    }
}
