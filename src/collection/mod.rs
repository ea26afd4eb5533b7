//! Pipeline collections: resolving pipelines by URL.
//!
//! Jokers that name another pipeline are resolved through a
//! [`PipelineCollection`]. [`SimplePipelineCollection`] holds compiled
//! pipelines in memory; [`collection_from_directory`] fills one from
//! `*.book.md` / `*.ptbk.md` files on disk.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::CollectionError;
use crate::llm::Prompt;
use crate::pipeline::{compile_pipeline, Pipeline};

/// File suffixes recognised as pipeline sources.
pub const PIPELINE_FILE_SUFFIXES: &[&str] = &[".book.md", ".ptbk.md"];

#[async_trait]
pub trait PipelineCollection: Send + Sync {
    /// URLs of every pipeline in the collection, sorted.
    async fn list_pipelines(&self) -> Result<Vec<String>, CollectionError>;

    async fn get_pipeline_by_url(&self, url: &str) -> Result<Pipeline, CollectionError>;

    /// Whether the prompt came from a pipeline this collection holds.
    async fn is_responsible_for_prompt(&self, prompt: &Prompt) -> bool;
}

/// Pipelines kept in memory, keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct SimplePipelineCollection {
    pipelines: BTreeMap<String, Pipeline>,
}

impl SimplePipelineCollection {
    /// Every pipeline needs a URL and no URL may appear twice.
    pub fn new(pipelines: impl IntoIterator<Item = Pipeline>) -> Result<Self, CollectionError> {
        let mut collection = Self::default();
        for pipeline in pipelines {
            collection.add(pipeline)?;
        }
        Ok(collection)
    }

    pub fn add(&mut self, pipeline: Pipeline) -> Result<(), CollectionError> {
        let url = pipeline
            .pipeline_url
            .clone()
            .ok_or_else(|| CollectionError::MissingUrl(pipeline.title.clone()))?;
        if self.pipelines.contains_key(&url) {
            return Err(CollectionError::DuplicateUrl(url));
        }
        self.pipelines.insert(url, pipeline);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[async_trait]
impl PipelineCollection for SimplePipelineCollection {
    async fn list_pipelines(&self) -> Result<Vec<String>, CollectionError> {
        Ok(self.pipelines.keys().cloned().collect())
    }

    async fn get_pipeline_by_url(&self, url: &str) -> Result<Pipeline, CollectionError> {
        self.pipelines
            .get(url)
            .cloned()
            .ok_or_else(|| CollectionError::NotFound(url.to_string()))
    }

    async fn is_responsible_for_prompt(&self, prompt: &Prompt) -> bool {
        prompt
            .pipeline_url
            .as_deref()
            .is_some_and(|url| self.pipelines.contains_key(url))
    }
}

fn is_pipeline_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| PIPELINE_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

/// Compile every pipeline file under `root` into a collection.
///
/// Files that fail to compile abort the load. Pipelines without a URL cannot
/// be looked up and are skipped with a warning.
pub async fn collection_from_directory(root: impl AsRef<Path>) -> Result<SimplePipelineCollection, CollectionError> {
    let root = root.as_ref();
    let mut files: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_pipeline_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    let mut collection = SimplePipelineCollection::default();
    for path in files {
        debug!(path = %path.display(), "Compiling pipeline for collection");
        let source = tokio::fs::read_to_string(&path).await?;
        let pipeline = compile_pipeline(&source).map_err(|e| CollectionError::Compile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if pipeline.pipeline_url.is_none() {
            warn!(path = %path.display(), "Pipeline has no URL, leaving it out of the collection");
            continue;
        }
        collection.add(pipeline)?;
    }

    info!(root = %root.display(), pipelines = collection.len(), "Pipeline collection loaded");
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelRequirements, ModelVariant};

    fn pipeline(title: &str, url: Option<&str>) -> Pipeline {
        let mut pipeline = Pipeline::new(title);
        pipeline.pipeline_url = url.map(str::to_string);
        pipeline
    }

    #[tokio::test]
    async fn test_lookup_and_listing() {
        let collection = SimplePipelineCollection::new(vec![
            pipeline("B", Some("https://books.example/b.book.md")),
            pipeline("A", Some("https://books.example/a.book.md")),
        ])
        .unwrap();

        assert_eq!(
            collection.list_pipelines().await.unwrap(),
            vec!["https://books.example/a.book.md", "https://books.example/b.book.md"]
        );
        let found = collection.get_pipeline_by_url("https://books.example/b.book.md").await.unwrap();
        assert_eq!(found.title, "B");
        assert!(matches!(
            collection.get_pipeline_by_url("https://books.example/c.book.md").await,
            Err(CollectionError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_and_missing_urls_rejected() {
        let url = Some("https://books.example/a.book.md");
        assert!(matches!(
            SimplePipelineCollection::new(vec![pipeline("A", url), pipeline("A2", url)]),
            Err(CollectionError::DuplicateUrl(_))
        ));
        assert!(matches!(
            SimplePipelineCollection::new(vec![pipeline("No url", None)]),
            Err(CollectionError::MissingUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_responsibility_follows_prompt_url() {
        let collection = SimplePipelineCollection::new(vec![pipeline("A", Some("https://books.example/a.book.md"))]).unwrap();
        let prompt = Prompt::new("t", "c", ModelRequirements::new(ModelVariant::Chat));
        assert!(!collection.is_responsible_for_prompt(&prompt).await);
        let prompt = prompt.with_pipeline_url(Some("https://books.example/a.book.md".into()));
        assert!(collection.is_responsible_for_prompt(&prompt).await);
    }

    #[tokio::test]
    async fn test_directory_loading() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/greeting.book.md"),
            "# Greeting\n\n- URL https://books.example/greeting.book.md\n- INPUT PARAMETER {name}\n- OUTPUT PARAMETER {greeting}\n\n## Greet\n\n- SIMPLE TEMPLATE\n\n```\nHello {name}\n```\n\n-> {greeting}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("draft.ptbk.md"), "# Draft\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Not a pipeline\n").unwrap();

        let collection = collection_from_directory(dir.path()).await.unwrap();
        assert_eq!(
            collection.list_pipelines().await.unwrap(),
            vec!["https://books.example/greeting.book.md"]
        );
    }

    #[tokio::test]
    async fn test_directory_with_broken_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.book.md"), "# Broken\n\n## A\n\n```\n{missing}\n```\n\n-> {a}\n").unwrap();
        assert!(matches!(
            collection_from_directory(dir.path()).await,
            Err(CollectionError::Compile { .. })
        ));
    }
}
