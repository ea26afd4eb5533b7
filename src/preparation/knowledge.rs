//! Turning knowledge sources into indexed knowledge pieces.

use std::collections::HashSet;

use super::fetcher::KnowledgeFetcher;
use super::keywords::extract_keywords;
use super::sources::{read_source, RawDocument, ScrapingBudget};
use super::PrepareOptions;
use crate::error::KnowledgeError;
use crate::llm::{ExecutionTools, ModelRequirements, ModelVariant, Prompt, Usage};
use crate::pipeline::{EmbeddingIndex, KnowledgePiece, KnowledgePieceSource, KnowledgeSource};
use crate::utils::normalize_to_kebab_case;

/// Pieces produced by one preparation pass and what it cost.
#[derive(Debug, Clone, Default)]
pub struct PreparedKnowledge {
    pub pieces: Vec<KnowledgePiece>,
    pub usage: Usage,
    /// Names of sources that failed and were skipped.
    pub failed_sources: Vec<String>,
}

/// Read, index and embed every source.
///
/// # Arguments
///
/// * `sources` - Knowledge sources in declaration order
/// * `tools` - Execution tools used for embeddings
/// * `fetcher` - Fetcher for URL sources
/// * `options` - Scraping limits and error policy
/// * `preparation_id` - Id stamped on every produced piece
///
/// # Returns
///
/// The pieces for every source that could be read. Sources past the scraping
/// budget are skipped; failing sources are skipped with a warning unless
/// `options.is_crashed_on_error` is set.
pub async fn prepare_knowledge(
    sources: &[KnowledgeSource],
    tools: &dyn ExecutionTools,
    fetcher: &dyn KnowledgeFetcher,
    options: &PrepareOptions,
    preparation_id: &str,
) -> Result<PreparedKnowledge, KnowledgeError> {
    let mut prepared = PreparedKnowledge::default();
    if sources.is_empty() {
        return Ok(prepared);
    }

    let embedding_models = embedding_model_names(tools).await;
    let mut budget = ScrapingBudget::new(options.max_scraping_total);
    let mut used_names = HashSet::new();

    for source in sources {
        if budget.is_exhausted() {
            tracing::info!(source = %source.name, "Skipping knowledge source, scraping limit reached");
            continue;
        }

        tracing::info!(source = %source.name, "Preparing knowledge source");
        let documents = match read_source(&source.source_content, fetcher, options, &mut budget).await {
            Ok(documents) => documents,
            Err(e) if options.is_crashed_on_error => return Err(e),
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "Knowledge source failed, skipping");
                prepared.failed_sources.push(source.name.clone());
                continue;
            }
        };

        for document in documents {
            let mut piece = piece_from_document(source, document, options.keyword_count, &mut used_names);
            match embed_piece(&mut piece, tools, &embedding_models).await {
                Ok(usage) => prepared.usage += &usage,
                Err(e) if options.is_crashed_on_error => return Err(e),
                Err(e) => tracing::warn!(piece = %piece.name, error = %e, "Embedding failed, piece stays unindexed"),
            }
            piece.preparation_ids.push(preparation_id.to_string());
            prepared.pieces.push(piece);
        }
    }

    tracing::info!(
        pieces = prepared.pieces.len(),
        failed = prepared.failed_sources.len(),
        "Knowledge prepared"
    );
    Ok(prepared)
}

/// Embedding models offered by `tools`; empty means "let the tools choose".
async fn embedding_model_names(tools: &dyn ExecutionTools) -> Vec<Option<String>> {
    let mut names: Vec<Option<String>> = Vec::new();
    match tools.list_models().await {
        Ok(models) => {
            for model in models.into_iter().filter(|m| m.model_variant == ModelVariant::Embedding) {
                let name = Some(model.model_name);
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Err(e) => tracing::warn!(tools = tools.title(), error = %e, "Could not list models"),
    }
    if names.is_empty() {
        names.push(None);
    }
    names
}

fn piece_from_document(
    source: &KnowledgeSource,
    document: RawDocument,
    keyword_count: usize,
    used_names: &mut HashSet<String>,
) -> KnowledgePiece {
    let base = normalize_to_kebab_case(document.title.as_deref().unwrap_or(&source.name));
    let base = if base.is_empty() { "piece".to_string() } else { base };
    let mut name = base.clone();
    let mut suffix = 2;
    while !used_names.insert(name.clone()) {
        name = format!("{base}-{suffix}");
        suffix += 1;
    }

    KnowledgePiece {
        name,
        title: document.title,
        keywords: extract_keywords(&document.content, keyword_count),
        content: document.content,
        sources: vec![KnowledgePieceSource {
            name: source.name.clone(),
            origin: document.origin,
            line: None,
            column: None,
        }],
        index: Vec::new(),
        preparation_ids: Vec::new(),
    }
}

async fn embed_piece(
    piece: &mut KnowledgePiece,
    tools: &dyn ExecutionTools,
    models: &[Option<String>],
) -> Result<Usage, KnowledgeError> {
    let mut usage = Usage::default();
    for model in models {
        let mut requirements = ModelRequirements::new(ModelVariant::Embedding);
        requirements.model_name = model.clone();
        let prompt = Prompt::new(format!("Embedding of {}", piece.name), piece.content.clone(), requirements);

        let result = tools.call_embedding_model(&prompt).await?;
        usage += &result.usage;
        piece.index.push(EmbeddingIndex {
            model_name: result.model_name,
            position: result.embedding,
        });
    }
    Ok(usage)
}
