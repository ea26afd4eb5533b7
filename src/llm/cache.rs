//! Caching decorator for execution tools.
//!
//! Results are keyed by a SHA-256 content hash of the model variant, model
//! name, rendered prompt content and parameters. At most one backend call is
//! in flight per key: concurrent callers with the same key await the same
//! shared future instead of issuing duplicate calls.
//!
//! # Usage
//!
//! ```ignore
//! use promptforge::llm::{CachedExecutionTools, MemoryStorage, MockedEchoTools};
//!
//! let tools = CachedExecutionTools::new(Arc::new(MockedEchoTools::new()), Arc::new(MemoryStorage::new()));
//! let result = tools.call_chat_model(&prompt).await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::storage::{CacheEntry, CacheStorage};
use super::tools::{call_model, expect_embedding, expect_text, ExecutionTools, SharedExecutionTools};
use super::types::{AvailableModel, EmbeddingResult, ModelCallResult, ModelVariant, Prompt, PromptResult};
use crate::error::ExecutionToolsError;
use crate::metrics::{CacheOutcome, MetricsCollector};

type SharedCall = Shared<BoxFuture<'static, Result<ModelCallResult, ExecutionToolsError>>>;

/// Hash identifying one cacheable model call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_prompt(prompt: &Prompt) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prompt.variant().as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(
            prompt
                .model_requirements
                .model_name
                .as_deref()
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(
            prompt
                .model_requirements
                .system_message
                .as_deref()
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(prompt.content.as_bytes());
        for (name, value) in &prompt.parameters {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counters for cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Answered from storage.
    pub hits: u64,
    /// Forwarded to the backend.
    pub misses: u64,
    /// Attached to a call already in flight.
    pub joins: u64,
}

impl CacheStats {
    /// Fraction of lookups served without a new backend call.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joins;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.joins) as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.hits,
            CacheOutcome::Miss => &self.misses,
            CacheOutcome::Join => &self.joins,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        MetricsCollector::new().record_cache_lookup(outcome);
    }
}

pub struct CachedExecutionTools {
    title: String,
    inner: SharedExecutionTools,
    storage: Arc<dyn CacheStorage>,
    in_flight: Mutex<HashMap<CacheKey, SharedCall>>,
    counters: Arc<Counters>,
    is_reloaded: bool,
}

impl CachedExecutionTools {
    pub fn new(inner: SharedExecutionTools, storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            title: format!("{} (cached)", inner.title()),
            inner,
            storage,
            in_flight: Mutex::new(HashMap::new()),
            counters: Arc::new(Counters::default()),
            is_reloaded: false,
        }
    }

    /// Skip storage reads so every call reaches the backend; results are still stored.
    pub fn with_reload(mut self, is_reloaded: bool) -> Self {
        self.is_reloaded = is_reloaded;
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
        }
    }

    async fn call_cached(&self, prompt: &Prompt) -> Result<ModelCallResult, ExecutionToolsError> {
        let key = CacheKey::for_prompt(prompt);

        // Check-or-register under one lock so two callers never both start a call.
        let (call, joined) = {
            let mut in_flight = self.in_flight.lock().expect("cache in-flight lock poisoned");
            match in_flight.get(&key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let call = resolve(
                        Arc::clone(&self.inner),
                        Arc::clone(&self.storage),
                        Arc::clone(&self.counters),
                        key.clone(),
                        prompt.clone(),
                        self.is_reloaded,
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(key.clone(), call.clone());
                    (call, false)
                }
            }
        };

        if joined {
            tracing::debug!(key = %key, "Joining in-flight model call");
            self.counters.record(CacheOutcome::Join);
        }

        let result = call.clone().await;

        let mut in_flight = self.in_flight.lock().expect("cache in-flight lock poisoned");
        if in_flight.get(&key).is_some_and(|current| current.ptr_eq(&call)) {
            in_flight.remove(&key);
        }

        result
    }
}

async fn resolve(
    inner: SharedExecutionTools,
    storage: Arc<dyn CacheStorage>,
    counters: Arc<Counters>,
    key: CacheKey,
    prompt: Prompt,
    is_reloaded: bool,
) -> Result<ModelCallResult, ExecutionToolsError> {
    if !is_reloaded {
        match storage.get(key.as_str()).await {
            Ok(Some(entry)) => {
                tracing::debug!(key = %key, "Prompt cache hit");
                counters.record(CacheOutcome::Hit);
                return Ok(entry.result);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Prompt cache read failed"),
        }
    }

    tracing::debug!(key = %key, "Prompt cache miss");
    counters.record(CacheOutcome::Miss);
    let result = call_model(inner.as_ref(), &prompt).await?;

    let entry = CacheEntry {
        key: key.to_string(),
        created_at: Utc::now(),
        prompt,
        result: result.clone(),
    };
    if let Err(e) = storage.set(&entry).await {
        tracing::warn!(key = %key, error = %e, "Prompt cache write failed");
    }

    Ok(result)
}

#[async_trait]
impl ExecutionTools for CachedExecutionTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn supports_variant(&self, variant: ModelVariant) -> bool {
        self.inner.supports_variant(variant)
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>, ExecutionToolsError> {
        self.inner.list_models().await
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.call_cached(prompt).await?)
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult, ExecutionToolsError> {
        expect_text(self.call_cached(prompt).await?)
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingResult, ExecutionToolsError> {
        expect_embedding(self.call_cached(prompt).await?)
    }
}
