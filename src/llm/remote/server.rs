//! Server side of the remote execution protocol.
//!
//! Each request is handled in its own task; frames from concurrent requests
//! on one connection are interleaved but every request still ends with
//! exactly one terminal frame.

use futures::{pin_mut, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::protocol::{decode_frame, write_frame, RemoteResult, RequestBody, RequestFrame, ServerFrame};
use crate::error::{ExecutionToolsError, RemoteError};
use crate::executor::TaskProgress;
use crate::llm::registry::ExecutionToolsRegistry;
use crate::llm::tools::{call_model, SharedExecutionTools};
use crate::llm::types::ModelCallResult;
use crate::utils::normalize_to_kebab_case;

pub struct RemoteServer {
    registry: Arc<ExecutionToolsRegistry>,
    tools: Option<SharedExecutionTools>,
    is_anonymous_mode_allowed: bool,
}

impl RemoteServer {
    /// A server that only accepts anonymous requests, building their tools with `registry`.
    pub fn new(registry: Arc<ExecutionToolsRegistry>) -> Self {
        Self {
            registry,
            tools: None,
            is_anonymous_mode_allowed: true,
        }
    }

    /// Tools answering requests that identify themselves with a client id.
    pub fn with_tools(mut self, tools: SharedExecutionTools) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_anonymous_mode(mut self, is_allowed: bool) -> Self {
        self.is_anonymous_mode_allowed = is_allowed;
        self
    }

    /// Bind `address` and start accepting connections in the background.
    pub async fn bind(self, address: &str) -> Result<RemoteServerHandle, RemoteError> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "Remote execution server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = Arc::new(self);
        let task = tokio::spawn(accept_loop(server, listener, shutdown_rx));

        Ok(RemoteServerHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    fn tools_for(&self, request: &RequestFrame) -> Result<SharedExecutionTools, ExecutionToolsError> {
        if let Some(client_id) = &request.client_id {
            tracing::debug!(client_id = %client_id, id = request.id, "Identified request");
            return self.tools.clone().ok_or_else(|| {
                ExecutionToolsError::InvalidConfiguration("server has no tools for identified clients".to_string())
            });
        }

        match &request.llm_tools_configuration {
            Some(_) if !self.is_anonymous_mode_allowed => Err(ExecutionToolsError::InvalidConfiguration(
                "anonymous requests are not allowed on this server".to_string(),
            )),
            Some(configuration) => self.registry.create_from_configuration(configuration),
            None => Err(ExecutionToolsError::InvalidConfiguration(
                "request carries neither a client id nor a tools configuration".to_string(),
            )),
        }
    }

    /// Frames answering one request, ending with exactly one terminal frame.
    fn respond(self: Arc<Self>, request: RequestFrame) -> impl Stream<Item = ServerFrame> {
        async_stream::stream! {
            let id = request.id;
            let tools = match self.tools_for(&request) {
                Ok(tools) => tools,
                Err(e) => {
                    yield ServerFrame::error(id, e);
                    return;
                }
            };

            match request.body {
                RequestBody::ListModels => match tools.list_models().await {
                    Ok(models) => {
                        yield ServerFrame::Response { id, result: RemoteResult::Models(models) };
                    }
                    Err(e) => {
                        yield ServerFrame::error(id, e);
                    }
                },
                RequestBody::Prompt { prompt } => {
                    let started = TaskProgress::started(
                        &normalize_to_kebab_case(&prompt.title),
                        &prompt.title,
                        "PROMPT_TEMPLATE",
                        "",
                    );
                    yield ServerFrame::Progress { id, task_progress: started.clone() };

                    match call_model(tools.as_ref(), &prompt).await {
                        Ok(result) => {
                            let value = match &result {
                                ModelCallResult::Text(text) => Some(text.content.clone()),
                                ModelCallResult::Embedding(_) => None,
                            };
                            yield ServerFrame::Progress { id, task_progress: started.finished(value) };
                            yield ServerFrame::Response { id, result: RemoteResult::PromptResult(result) };
                        }
                        Err(e) => {
                            tracing::warn!(id, error = %e, "Remote prompt failed");
                            yield ServerFrame::Progress { id, task_progress: started.finished(None) };
                            yield ServerFrame::error(id, e);
                        }
                    }
                }
            }
        }
    }
}

async fn accept_loop(server: Arc<RemoteServer>, listener: TcpListener, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Remote execution server shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    tracing::info!(peer = %peer, "Remote client connected");
                    tokio::spawn(serve_connection(Arc::clone(&server), socket));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
            },
        }
    }
}

async fn serve_connection(server: Arc<RemoteServer>, socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::warn!(error = %e, "Failed to write frame");
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read from client");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match decode_request(&line) {
            Ok(request) => request,
            Err(reply) => {
                if let Some(frame) = reply {
                    let _ = frames_tx.send(frame);
                }
                continue;
            }
        };

        let frames = Arc::clone(&server).respond(request);
        let frames_tx = frames_tx.clone();
        tokio::spawn(async move {
            pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                if frames_tx.send(frame).is_err() {
                    break;
                }
            }
        });
    }

    drop(frames_tx);
    let _ = writer_task.await;
    tracing::info!("Remote client disconnected");
}

/// Decode one request line.
///
/// A malformed request that still carries an id is answered with an error
/// frame for that id; one without an id can only be dropped.
fn decode_request(line: &str) -> Result<RequestFrame, Option<ServerFrame>> {
    let value: serde_json::Value = decode_frame(line).map_err(|e| {
        tracing::warn!(error = %e, "Discarding request frame that is not JSON");
        None
    })?;
    let id = value.get("id").and_then(serde_json::Value::as_u64);
    serde_json::from_value(value).map_err(|e| {
        tracing::warn!(id = ?id, error = %e, "Malformed request frame");
        id.map(|id| ServerFrame::error(id, ExecutionToolsError::Remote(format!("malformed request: {e}"))))
    })
}

/// Running server; dropping it leaves the server running until the runtime stops.
pub struct RemoteServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RemoteServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Requests already in progress still complete.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Wait until the accept loop stops.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::registry::ToolsConfiguration;
    use crate::llm::remote::client::{RemoteExecutionTools, RemoteToolsOptions};
    use crate::llm::tools::ExecutionTools;
    use crate::llm::types::{ModelRequirements, ModelVariant, Prompt};
    use crate::llm::MockedEchoTools;

    fn prompt(content: &str) -> Prompt {
        Prompt::new("Greeting", content, ModelRequirements::new(ModelVariant::Chat))
    }

    #[tokio::test]
    async fn test_identified_client_gets_server_tools() {
        let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
            .with_tools(Arc::new(MockedEchoTools::new()))
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let client = RemoteExecutionTools::new(RemoteToolsOptions::identified(
            handle.local_addr().to_string(),
            "alice",
        ));
        let mut progress = client.subscribe_progress();

        let result = client.call_chat_model(&prompt("hello remote")).await.unwrap();
        assert_eq!(result.content, "hello remote");

        let first = progress.next().await.unwrap().unwrap();
        assert!(first.progress.is_started);
        assert_eq!(first.progress.name, "greeting");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_anonymous_client_supplies_configuration() {
        let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let client = RemoteExecutionTools::new(RemoteToolsOptions::anonymous(
            handle.local_addr().to_string(),
            vec![ToolsConfiguration::new("mocked-echo")],
        ));
        let models = client.list_models().await.unwrap();
        assert!(models.iter().any(|model| model.model_name == "mocked-echo"));

        let result = client.call_chat_model(&prompt("anon")).await.unwrap();
        assert_eq!(result.content, "anon");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_errors_keep_their_kind() {
        let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
            .with_tools(Arc::new(MockedEchoTools::new()))
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let client = RemoteExecutionTools::new(RemoteToolsOptions::identified(
            handle.local_addr().to_string(),
            "alice",
        ));
        let embedding = Prompt::new("e", "x", ModelRequirements::new(ModelVariant::Embedding));
        let err = client.call_embedding_model(&embedding).await.unwrap_err();
        assert!(matches!(err, ExecutionToolsError::UnsupportedVariant { .. }));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_frame() {
        use tokio::io::AsyncWriteExt;

        let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
            .with_tools(Arc::new(MockedEchoTools::new()))
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let socket = TcpStream::connect(handle.local_addr()).await.unwrap();
        let (reader, mut writer) = socket.into_split();
        writer.write_all(b"not json at all\n").await.unwrap();
        writer
            .write_all(b"{\"id\":7,\"clientId\":\"a\",\"body\":{\"kind\":\"bogus\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let line = tokio::time::timeout(std::time::Duration::from_secs(5), lines.next_line())
            .await
            .expect("server should answer the malformed request")
            .unwrap()
            .unwrap();
        let frame: ServerFrame = decode_frame(&line).unwrap();
        assert_eq!(frame.id(), 7);
        assert!(frame.is_terminal());
        assert!(matches!(frame, ServerFrame::Error { error: Some(ExecutionToolsError::Remote(_)), .. }));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_anonymous_mode_can_be_disabled() {
        let handle = RemoteServer::new(Arc::new(ExecutionToolsRegistry::with_defaults()))
            .with_anonymous_mode(false)
            .bind("127.0.0.1:0")
            .await
            .unwrap();

        let client = RemoteExecutionTools::new(RemoteToolsOptions::anonymous(
            handle.local_addr().to_string(),
            vec![ToolsConfiguration::new("mocked-echo")],
        ));
        let err = client.call_chat_model(&prompt("x")).await.unwrap_err();
        assert!(matches!(err, ExecutionToolsError::InvalidConfiguration(_)));
        handle.shutdown().await;
    }
}
