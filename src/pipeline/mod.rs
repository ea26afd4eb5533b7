//! The pipeline language: parsing, building, validation and serialization.

pub mod builder;
pub mod commands;
pub mod edit;
pub mod graph;
pub mod markdown;
pub mod serialize;
pub mod types;
pub mod validator;

pub use builder::{build_pipeline, PipelineBuilder};
pub use commands::{parse_command, Command, UsagePlace};
pub use edit::rename_parameter;
pub use graph::DependencyGraph;
pub use serialize::{check_book_version, pipeline_from_json, pipeline_to_json};
pub use types::{
    is_reserved_parameter_name, EmbeddingIndex, KnowledgePiece, KnowledgePieceSource,
    KnowledgeSource, Parameter, Persona, PersonaDefinition, Pipeline, Preparation,
    PreparedPersona, Template, TemplateKind, BOOK_VERSION, RESERVED_PARAMETER_NAMES,
};
pub use validator::validate_pipeline;

use crate::error::ForgeError;

/// Build, version-check and validate a pipeline from markdown source.
pub fn compile_pipeline(source: &str) -> Result<Pipeline, ForgeError> {
    let pipeline = build_pipeline(source)?;
    check_book_version(&pipeline.book_version)?;
    validate_pipeline(&pipeline)?;
    Ok(pipeline)
}
