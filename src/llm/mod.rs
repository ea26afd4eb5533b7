//! Execution tools: the pluggable interface to text and embedding backends.
//!
//! Every backend implements [`ExecutionTools`]. Decorators compose on top:
//!
//! - [`MultipleExecutionTools`] tries members in order, falling back on failure
//! - [`CachedExecutionTools`] keeps results in a [`CacheStorage`] and never runs
//!   two identical calls at once
//! - [`RemoteExecutionTools`] forwards calls to a [`RemoteServer`]
//!
//! ```ignore
//! use promptforge::llm::{ExecutionToolsRegistry, ToolsConfiguration};
//!
//! let registry = ExecutionToolsRegistry::with_defaults();
//! let tools = registry.create_from_configuration(&[ToolsConfiguration::new("mocked-echo")])?;
//! let result = tools.call_chat_model(&prompt).await?;
//! ```

pub mod cache;
pub mod mocked;
pub mod multiple;
pub mod openai;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod tools;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheKey, CacheStats, CachedExecutionTools};
pub use mocked::{MockedEchoTools, MockedEmbeddingTools};
pub use multiple::{join_execution_tools, MultipleExecutionTools};
pub use openai::{OpenAiCompatibleOptions, OpenAiCompatibleTools};
pub use registry::{ExecutionToolsRegistry, ToolsConfiguration, ToolsConstructor};
pub use remote::{RemoteExecutionTools, RemoteServer, RemoteServerHandle, RemoteToolsOptions};
pub use storage::{CacheEntry, CacheStorage, FileSystemStorage, MemoryStorage, SqliteStorage, StorageError};
pub use tools::{call_model, ExecutionTools, SharedExecutionTools};
pub use types::{
    AvailableModel, EmbeddingResult, ModelCallResult, ModelRequirements, ModelVariant, Prompt,
    PromptResult, PromptTiming, Usage,
};
