//! Remote execution: a client that implements [`ExecutionTools`] by forwarding
//! prompts to a server over one persistent TCP connection, and that server.
//!
//! One request produces zero or more progress frames followed by exactly one
//! terminal response or error frame.
//!
//! [`ExecutionTools`]: crate::llm::ExecutionTools

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{RemoteExecutionTools, RemoteProgress, RemoteToolsOptions, DEFAULT_REMOTE_ADDRESS};
pub use protocol::{RemoteResult, RequestBody, RequestFrame, ServerFrame};
pub use server::{RemoteServer, RemoteServerHandle};
