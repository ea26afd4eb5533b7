//! Where cached model results live between runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;

use super::types::{ModelCallResult, Prompt};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_cache (
    key         TEXT PRIMARY KEY,
    entry       TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt cache entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One stored result with the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub prompt: Prompt,
    pub result: ModelCallResult,
}

#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError>;
}

/// Entries kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache storage lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .expect("cache storage lock poisoned")
            .get(key)
            .cloned())
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.entries
            .write()
            .expect("cache storage lock poisoned")
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }
}

/// One JSON file per key, fanned out by the first two hex digits.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.root.join(shard).join(format!("{key}.json"))
    }
}

#[async_trait]
impl CacheStorage for FileSystemStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let path = self.path_for(&entry.key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Entries in a single SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = path, "Prompt cache database opened");
        Ok(Self { pool })
    }
}

#[async_trait]
impl CacheStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let row = sqlx::query("SELECT entry FROM prompt_cache WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let entry: String = row.try_get("entry")?;
                Ok(Some(serde_json::from_str(&entry)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let json = serde_json::to_string(entry)?;
        sqlx::query(
            "INSERT INTO prompt_cache (key, entry, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET entry = excluded.entry, created_at = excluded.created_at",
        )
        .bind(&entry.key)
        .bind(json)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
