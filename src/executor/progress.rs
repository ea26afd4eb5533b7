//! Progress events emitted while templates run.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Status snapshot of one template, sent whenever it starts or finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub name: String,
    pub title: String,
    pub is_started: bool,
    pub is_done: bool,
    pub block_type: String,
    pub parameter_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_value: Option<String>,
}

impl TaskProgress {
    pub fn started(name: &str, title: &str, block_type: &str, parameter_name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            is_started: true,
            is_done: false,
            block_type: block_type.to_string(),
            parameter_name: parameter_name.to_string(),
            parameter_value: None,
        }
    }

    /// The same task, finished with `value` (or without a value when it failed).
    pub fn finished(mut self, value: Option<String>) -> Self {
        self.is_done = true;
        self.parameter_value = value;
        self
    }
}

/// Optional sink for progress events; a dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<TaskProgress>>,
}

impl ProgressSink {
    pub fn new(sender: mpsc::UnboundedSender<TaskProgress>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that discards every event.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, progress: TaskProgress) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(progress);
        }
    }
}
