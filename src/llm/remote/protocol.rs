//! Frames exchanged between the remote client and server.
//!
//! Every frame is one JSON object on its own line. A request carries an id
//! chosen by the client; the server answers with zero or more `progress`
//! frames and then exactly one `response` or `error` frame for that id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{ExecutionToolsError, RemoteError};
use crate::executor::TaskProgress;
use crate::llm::registry::ToolsConfiguration;
use crate::llm::types::{AvailableModel, ModelCallResult, Prompt};

/// Client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub id: u64,
    /// Use the tools the server was started with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Build tools from this configuration for this request only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_tools_configuration: Option<Vec<ToolsConfiguration>>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RequestBody {
    Prompt { prompt: Prompt },
    ListModels,
}

/// Terminal payload of a successful request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteResult {
    PromptResult(ModelCallResult),
    Models(Vec<AvailableModel>),
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Progress { id: u64, task_progress: TaskProgress },
    Response { id: u64, result: RemoteResult },
    Error {
        id: u64,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ExecutionToolsError>,
    },
}

impl ServerFrame {
    pub fn id(&self) -> u64 {
        match self {
            ServerFrame::Progress { id, .. } | ServerFrame::Response { id, .. } | ServerFrame::Error { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerFrame::Progress { .. })
    }

    pub fn error(id: u64, error: ExecutionToolsError) -> Self {
        ServerFrame::Error {
            id,
            message: error.to_string(),
            error: Some(error),
        }
    }
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, RemoteError> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Write `frame` followed by a newline and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), RemoteError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
