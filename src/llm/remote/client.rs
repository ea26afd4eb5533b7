//! Execution tools that forward every call to a remote server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, OnceCell};
use tokio_stream::wrappers::BroadcastStream;

use super::protocol::{decode_frame, write_frame, RemoteResult, RequestBody, RequestFrame, ServerFrame};
use crate::error::{ExecutionToolsError, RemoteError};
use crate::executor::TaskProgress;
use crate::llm::registry::ToolsConfiguration;
use crate::llm::tools::{expect_embedding, expect_text, ExecutionTools};
use crate::llm::types::{AvailableModel, EmbeddingResult, ModelCallResult, ModelVariant, Prompt, PromptResult};

pub const DEFAULT_REMOTE_ADDRESS: &str = "127.0.0.1:4460";

/// How to reach the server and which tools it should use.
///
/// With a `client_id` the server answers with the tools it was started with;
/// otherwise `llm_tools_configuration` is sent along and the server builds
/// tools from it for each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteToolsOptions {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub llm_tools_configuration: Option<Vec<ToolsConfiguration>>,
}

fn default_address() -> String {
    DEFAULT_REMOTE_ADDRESS.to_string()
}

impl Default for RemoteToolsOptions {
    fn default() -> Self {
        Self {
            address: default_address(),
            client_id: None,
            llm_tools_configuration: None,
        }
    }
}

impl RemoteToolsOptions {
    pub fn identified(address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_id: Some(client_id.into()),
            llm_tools_configuration: None,
        }
    }

    pub fn anonymous(address: impl Into<String>, configuration: Vec<ToolsConfiguration>) -> Self {
        Self {
            address: address.into(),
            client_id: None,
            llm_tools_configuration: Some(configuration),
        }
    }
}

/// A progress event together with the request it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteProgress {
    pub request_id: u64,
    pub progress: TaskProgress,
}

type Reply = Result<RemoteResult, ExecutionToolsError>;

#[derive(Default)]
struct ConnectionState {
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    /// Highest request id registered on this connection.
    last_issued: u64,
    broken: Option<String>,
}

impl ConnectionState {
    fn register(&mut self, id: u64, reply: oneshot::Sender<Reply>) {
        self.last_issued = self.last_issued.max(id);
        self.pending.insert(id, reply);
    }

    /// Ids are issued in increasing order, so an issued id that is no longer
    /// pending has already received its terminal frame.
    fn is_finished(&self, id: u64) -> bool {
        id <= self.last_issued && !self.pending.contains_key(&id)
    }

    /// Reject every pending call and refuse new ones.
    fn break_with(&mut self, reason: String) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ExecutionToolsError::Remote(reason.clone())));
        }
        self.broken = Some(reason);
    }
}

struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Arc<Mutex<ConnectionState>>,
}

pub struct RemoteExecutionTools {
    title: String,
    options: RemoteToolsOptions,
    connection: OnceCell<Connection>,
    next_id: AtomicU64,
    progress: broadcast::Sender<RemoteProgress>,
}

impl RemoteExecutionTools {
    /// The connection is opened on first use.
    pub fn new(options: RemoteToolsOptions) -> Self {
        let (progress, _) = broadcast::channel(256);
        Self {
            title: format!("Remote ({})", options.address),
            options,
            connection: OnceCell::new(),
            next_id: AtomicU64::new(1),
            progress,
        }
    }

    /// Progress events of every request made through these tools.
    pub fn subscribe_progress(&self) -> BroadcastStream<RemoteProgress> {
        BroadcastStream::new(self.progress.subscribe())
    }

    async fn connection(&self) -> Result<&Connection, RemoteError> {
        self.connection
            .get_or_try_init(|| async {
                let stream = TcpStream::connect(&self.options.address).await?;
                tracing::info!(address = %self.options.address, "Connected to remote execution server");
                let (reader, writer) = stream.into_split();
                let state = Arc::new(Mutex::new(ConnectionState::default()));
                tokio::spawn(read_frames(reader, Arc::clone(&state), self.progress.clone()));
                Ok::<_, RemoteError>(Connection {
                    writer: tokio::sync::Mutex::new(writer),
                    state,
                })
            })
            .await
    }

    /// Send one request and wait for its terminal frame.
    pub async fn request(&self, body: RequestBody) -> Result<RemoteResult, ExecutionToolsError> {
        let connection = self.connection().await.map_err(remote_error)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut state = connection.state.lock().expect("remote connection lock poisoned");
            if let Some(reason) = &state.broken {
                return Err(ExecutionToolsError::Remote(reason.clone()));
            }
            state.register(id, reply_tx);
        }

        let frame = RequestFrame {
            id,
            client_id: self.options.client_id.clone(),
            llm_tools_configuration: self.options.llm_tools_configuration.clone(),
            body,
        };
        let sent = {
            let mut writer = connection.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };
        if let Err(e) = sent {
            connection
                .state
                .lock()
                .expect("remote connection lock poisoned")
                .pending
                .remove(&id);
            return Err(remote_error(e));
        }

        reply_rx
            .await
            .map_err(|_| remote_error(RemoteError::ConnectionClosed))?
    }

    async fn call(&self, prompt: &Prompt) -> Result<ModelCallResult, ExecutionToolsError> {
        match self
            .request(RequestBody::Prompt {
                prompt: prompt.clone(),
            })
            .await?
        {
            RemoteResult::PromptResult(result) => Ok(result),
            RemoteResult::Models(_) => Err(remote_error(RemoteError::ProtocolViolation(
                "expected a prompt result, got a model list".to_string(),
            ))),
        }
    }
}

fn remote_error(error: RemoteError) -> ExecutionToolsError {
    ExecutionToolsError::Remote(error.to_string())
}

async fn read_frames(
    reader: OwnedReadHalf,
    state: Arc<Mutex<ConnectionState>>,
    progress: broadcast::Sender<RemoteProgress>,
) {
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break RemoteError::ConnectionClosed,
            Err(e) => break RemoteError::Io(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: ServerFrame = match decode_frame(&line) {
            Ok(frame) => frame,
            Err(e) => break e,
        };

        let mut state = state.lock().expect("remote connection lock poisoned");
        let id = frame.id();
        if state.is_finished(id) {
            break RemoteError::ProtocolViolation(format!("frame for request {id} received after its response"));
        }
        match frame {
            ServerFrame::Progress { id, task_progress } => {
                if !state.pending.contains_key(&id) {
                    break RemoteError::ProtocolViolation(format!("progress for unknown request {id}"));
                }
                let _ = progress.send(RemoteProgress {
                    request_id: id,
                    progress: task_progress,
                });
            }
            ServerFrame::Response { id, result } => {
                if let Some(reply) = state.pending.remove(&id) {
                    let _ = reply.send(Ok(result));
                }
            }
            ServerFrame::Error { id, message, error } => {
                if let Some(reply) = state.pending.remove(&id) {
                    let _ = reply.send(Err(error.unwrap_or(ExecutionToolsError::Remote(message))));
                }
            }
        }
    };

    match &reason {
        RemoteError::ConnectionClosed => tracing::info!("Remote execution server closed the connection"),
        other => tracing::error!(error = %other, "Remote connection failed"),
    }
    state
        .lock()
        .expect("remote connection lock poisoned")
        .break_with(reason.to_string());
}

#[async_trait]
impl ExecutionTools for RemoteExecutionTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn supports_variant(&self, _variant: ModelVariant) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        match self.request(RequestBody::ListModels).await? {
            RemoteResult::Models(models) => Ok(models),
            RemoteResult::PromptResult(_) => Err(remote_error(RemoteError::ProtocolViolation(
                "expected a model list, got a prompt result".to_string(),
            ))),
        }
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.call(prompt).await?)
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.call(prompt).await?)
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        expect_embedding(self.call(prompt).await?)
    }
}
