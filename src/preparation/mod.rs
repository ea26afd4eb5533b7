//! Preparation: enriching a pipeline before execution.
//!
//! Knowledge sources are read (bounded by a scraping depth and a total
//! document budget), split into pieces with keywords and embedded with every
//! embedding model the tools offer. Raw personas are bound to a chat model.
//! Each pass is recorded as a [`Preparation`] whose id is stamped on
//! everything it touched.
//!
//! # Example
//!
//! ```ignore
//! use promptforge::preparation::{prepare_pipeline, HttpFetcher, PrepareOptions};
//!
//! let prepared = prepare_pipeline(&pipeline, tools.as_ref(), &HttpFetcher::default(), &PrepareOptions::default()).await?;
//! ```

pub mod fetcher;
pub mod keywords;
pub mod knowledge;
pub mod persona;
pub mod sources;

use std::path::PathBuf;

pub use fetcher::{FetchedDocument, HttpFetcher, KnowledgeFetcher};
pub use keywords::extract_keywords;
pub use knowledge::{prepare_knowledge, PreparedKnowledge};
pub use persona::prepare_persona;
pub use sources::{html_to_text, read_source, RawDocument, ScrapingBudget, SourceKind};

use crate::error::KnowledgeError;
use crate::llm::ExecutionTools;
use crate::pipeline::{Persona, Pipeline, Preparation, BOOK_VERSION};

pub const DEFAULT_MAX_SCRAPING_DEPTH: usize = 3;
pub const DEFAULT_MAX_SCRAPING_TOTAL: usize = 200;
pub const DEFAULT_KEYWORD_COUNT: usize = 8;

/// Limits and policy for one preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOptions {
    /// Pages on the path from a root URL (the root counts as 1); also the directory walk depth.
    pub max_scraping_depth: usize,
    /// Documents read across all sources.
    pub max_scraping_total: usize,
    pub keyword_count: usize,
    /// Abort on the first failing source instead of skipping it.
    pub is_crashed_on_error: bool,
    /// Base for relative file paths in knowledge sources.
    pub root_dir: Option<PathBuf>,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            max_scraping_depth: DEFAULT_MAX_SCRAPING_DEPTH,
            max_scraping_total: DEFAULT_MAX_SCRAPING_TOTAL,
            keyword_count: DEFAULT_KEYWORD_COUNT,
            is_crashed_on_error: false,
            root_dir: None,
        }
    }
}

impl PrepareOptions {
    pub fn with_max_scraping_depth(mut self, depth: usize) -> Self {
        self.max_scraping_depth = depth;
        self
    }

    pub fn with_max_scraping_total(mut self, total: usize) -> Self {
        self.max_scraping_total = total;
        self
    }

    pub fn with_crash_on_error(mut self, is_crashed_on_error: bool) -> Self {
        self.is_crashed_on_error = is_crashed_on_error;
        self
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }
}

/// Whether `pipeline` went through preparation and nothing in it is still raw.
pub fn is_pipeline_prepared(pipeline: &Pipeline) -> bool {
    !pipeline.preparations.is_empty()
        && pipeline.personas.iter().all(Persona::is_prepared)
        && (pipeline.knowledge_sources.is_empty() || !pipeline.knowledge_pieces.is_empty())
}

/// Prepare knowledge and personas, returning a new pipeline.
///
/// An already prepared pipeline is returned unchanged; pieces from earlier
/// passes are never merged or deduplicated.
pub async fn prepare_pipeline(
    pipeline: &Pipeline,
    tools: &dyn ExecutionTools,
    fetcher: &dyn KnowledgeFetcher,
    options: &PrepareOptions,
) -> Result<Pipeline, KnowledgeError> {
    if is_pipeline_prepared(pipeline) {
        tracing::debug!(pipeline = %pipeline.title, "Pipeline already prepared");
        return Ok(pipeline.clone());
    }

    let preparation_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(pipeline = %pipeline.title, preparation = %preparation_id, "Preparing pipeline");

    let knowledge = prepare_knowledge(&pipeline.knowledge_sources, tools, fetcher, options, &preparation_id).await?;

    let mut personas = Vec::with_capacity(pipeline.personas.len());
    for persona in &pipeline.personas {
        personas.push(match persona {
            Persona::Raw(definition) => Persona::Prepared(prepare_persona(definition, tools, &preparation_id).await?),
            prepared @ Persona::Prepared(_) => prepared.clone(),
        });
    }

    let mut prepared = pipeline.clone();
    prepared.knowledge_pieces.extend(knowledge.pieces);
    prepared.personas = personas;
    prepared.preparations.push(Preparation {
        id: preparation_id,
        book_version: BOOK_VERSION.to_string(),
        usage: knowledge.usage,
    });
    Ok(prepared)
}
