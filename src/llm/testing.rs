//! Scripted execution tools used by unit tests across the crate.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::tools::ExecutionTools;
use super::types::{AvailableModel, ModelVariant, Prompt, PromptResult, PromptTiming, Usage};
use crate::error::ExecutionToolsError;

fn text_result(prompt: &Prompt, content: String) -> PromptResult {
    PromptResult {
        usage: Usage::from_texts(&prompt.content, &content),
        content,
        model_name: "scripted".to_string(),
        timing: PromptTiming::between(Utc::now(), Utc::now()),
        raw_prompt_content: prompt.content.clone(),
        raw_request: serde_json::Value::Null,
        raw_response: serde_json::Value::Null,
    }
}

/// Fails every chat call and counts how often it was asked.
pub struct FailingTools {
    title: String,
    calls: AtomicUsize,
}

impl FailingTools {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionTools for FailingTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        matches!(variant, ModelVariant::Chat | ModelVariant::Completion)
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        Err(ExecutionToolsError::RequestFailed("unavailable".into()))
    }

    async fn call_chat_model(&self, _prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExecutionToolsError::RequestFailed(format!("{} is down", self.title)))
    }
}

/// Echoes after a delay, counting backend calls and peak concurrency.
///
/// Prompts whose content contains `fail_marker` are rejected.
pub struct CountingTools {
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    fail_marker: Option<String>,
}

impl CountingTools {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_marker: None,
        }
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn answer(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.fail_marker {
            Some(marker) if prompt.content.contains(marker.as_str()) => {
                Err(ExecutionToolsError::RequestFailed("scripted failure".into()))
            }
            _ => Ok(text_result(prompt, prompt.content.clone())),
        }
    }
}

#[async_trait]
impl ExecutionTools for CountingTools {
    fn title(&self) -> &str {
        "Counting"
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        matches!(variant, ModelVariant::Chat | ModelVariant::Completion)
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        Ok(vec![AvailableModel::new("counting", ModelVariant::Chat)])
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        self.answer(prompt).await
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        self.answer(prompt).await
    }
}

/// Returns queued answers in order, then repeats the last one.
pub struct ScriptedTools {
    answers: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedTools {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionTools for ScriptedTools {
    fn title(&self) -> &str {
        "Scripted"
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        variant == ModelVariant::Chat
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        Ok(vec![AvailableModel::new("scripted", ModelVariant::Chat)])
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .get(index)
            .or_else(|| self.answers.last())
            .cloned()
            .unwrap_or_default();
        Ok(text_result(prompt, answer))
    }
}
