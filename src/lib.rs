//! promptforge: compile markdown prompt pipelines, prepare their knowledge
//! and execute them against LLM backends.
//!
//! A pipeline book is a markdown document whose sections are templates
//! connected by `{parameter}` placeholders. This library parses and validates
//! books, prepares knowledge and personas, and runs the templates in
//! dependency order with bounded parallelism.

// Core modules
pub mod cli;
pub mod collection;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod preparation;
pub mod template;
pub mod utils;

// Re-export commonly used error types
pub use error::{
    CollectionError, ExecutionToolsError, ForgeError, KnowledgeError, ParsingError, PipelineExecutionError,
    PipelineLogicError, RemoteError, VersionMismatchError,
};
