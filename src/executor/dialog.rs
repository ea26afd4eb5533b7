//! User interface tools for `DIALOG TEMPLATE` sections.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::ExecutionToolsError;

/// A question put to a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    pub title: String,
    /// Rendered template content shown as the question.
    pub prompt: String,
    pub default_value: Option<String>,
}

/// Asks a person for a value.
#[async_trait]
pub trait UserInterfaceTools: Send + Sync {
    async fn prompt_dialog(&self, request: &DialogRequest) -> Result<String, ExecutionToolsError>;
}

/// Asks on stderr and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinUserInterface;

#[async_trait]
impl UserInterfaceTools for StdinUserInterface {
    async fn prompt_dialog(&self, request: &DialogRequest) -> Result<String, ExecutionToolsError> {
        let mut stderr = tokio::io::stderr();
        let mut question = format!("\n{}\n{}\n", request.title, request.prompt);
        if let Some(default) = &request.default_value {
            question.push_str(&format!("[{default}] "));
        }
        question.push_str("> ");
        stderr
            .write_all(question.as_bytes())
            .await
            .map_err(|e| ExecutionToolsError::Dialog(e.to_string()))?;
        stderr.flush().await.ok();

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| ExecutionToolsError::Dialog(e.to_string()))?;
        if read == 0 {
            return Err(ExecutionToolsError::Dialog("stdin closed".into()));
        }

        let answer = line.trim_end_matches(['\r', '\n']).to_string();
        match (&request.default_value, answer.is_empty()) {
            (Some(default), true) => Ok(default.clone()),
            _ => Ok(answer),
        }
    }
}
