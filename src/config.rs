//! Runtime configuration for the executor, preparation, cache and remote server.
//!
//! Values are layered, lowest priority first: built-in defaults, a YAML file,
//! then `FORGE_*` environment variables. The CLI applies its flags on top and
//! calls [`ForgeConfig::validate`] last.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::{ExecutorOptions, DEFAULT_MAX_EXECUTION_ATTEMPTS, DEFAULT_MAX_PARALLEL_COUNT};
use crate::llm::{CacheStorage, FileSystemStorage, MemoryStorage, SqliteStorage, StorageError, ToolsConfiguration};
use crate::preparation::{
    PrepareOptions, DEFAULT_KEYWORD_COUNT, DEFAULT_MAX_SCRAPING_DEPTH, DEFAULT_MAX_SCRAPING_TOTAL,
};

/// Port the remote execution server listens on by default.
pub const DEFAULT_REMOTE_PORT: u16 = 4460;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A value could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Templates running at the same time.
    pub max_parallel_count: usize,
    /// Attempts per template before it fails terminally.
    pub max_execution_attempts: usize,
    pub is_crashed_on_error: bool,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_parallel_count: DEFAULT_MAX_PARALLEL_COUNT,
            max_execution_attempts: DEFAULT_MAX_EXECUTION_ATTEMPTS,
            is_crashed_on_error: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreparationSection {
    pub max_scraping_depth: usize,
    pub max_scraping_total: usize,
    pub keyword_count: usize,
    pub is_crashed_on_error: bool,
    /// Base directory for relative knowledge file paths.
    pub root_dir: Option<PathBuf>,
}

impl Default for PreparationSection {
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

/// Where cached prompt results are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// No caching at all.
    None,
    #[default]
    Memory,
    Filesystem,
    Sqlite,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(CacheKind::None),
            "memory" => Ok(CacheKind::Memory),
            "filesystem" | "fs" => Ok(CacheKind::Filesystem),
            "sqlite" => Ok(CacheKind::Sqlite),
            other => Err(format!("unknown cache kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub kind: CacheKind,
    /// Directory for the filesystem store and the SQLite database.
    pub dir: PathBuf,
    /// Skip cached reads but keep writing fresh results.
    pub is_reloaded: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            dir: PathBuf::from("./.promptforge-cache"),
            is_reloaded: false,
        }
    }
}

impl CacheSection {
    /// Open the configured storage; `None` when caching is off.
    pub async fn open_storage(&self) -> Result<Option<Arc<dyn CacheStorage>>, StorageError> {
        let storage: Arc<dyn CacheStorage> = match self.kind {
            CacheKind::None => return Ok(None),
            CacheKind::Memory => Arc::new(MemoryStorage::new()),
            CacheKind::Filesystem => Arc::new(FileSystemStorage::new(&self.dir)),
            CacheKind::Sqlite => {
                tokio::fs::create_dir_all(&self.dir).await?;
                let path = self.dir.join("prompt-cache.sqlite");
                Arc::new(SqliteStorage::open(&path.to_string_lossy()).await?)
            }
        };
        Ok(Some(storage))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub host: String,
    pub port: u16,
    /// Accept requests that bring their own tools configuration.
    pub is_anonymous_mode_allowed: bool,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REMOTE_PORT,
            is_anonymous_mode_allowed: true,
        }
    }
}

impl RemoteSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete configuration of a promptforge process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub executor: ExecutorSection,
    pub preparation: PreparationSection,
    pub cache: CacheSection,
    pub remote: RemoteSection,
    /// Execution tools, tried in order.
    pub tools: Vec<ToolsConfiguration>,
}

impl ForgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Creates configuration from defaults and environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then the YAML file when given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides values from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_MAX_PARALLEL_COUNT`: Templates running at once (default: 5)
    /// - `FORGE_MAX_EXECUTION_ATTEMPTS`: Attempts per template (default: 3)
    /// - `FORGE_IS_CRASHED_ON_ERROR`: Abort runs on the first failure (default: false)
    /// - `FORGE_MAX_SCRAPING_DEPTH`: Link depth for URL knowledge (default: 3)
    /// - `FORGE_MAX_SCRAPING_TOTAL`: Documents read per preparation (default: 200)
    /// - `FORGE_KEYWORD_COUNT`: Keywords per knowledge piece (default: 8)
    /// - `FORGE_KNOWLEDGE_ROOT`: Base directory for relative knowledge paths
    /// - `FORGE_CACHE_KIND`: none, memory, filesystem or sqlite (default: memory)
    /// - `FORGE_CACHE_DIR`: Cache directory (default: ./.promptforge-cache)
    /// - `FORGE_CACHE_RELOAD`: Bypass cached reads (default: false)
    /// - `FORGE_REMOTE_HOST`: Remote server host (default: 127.0.0.1)
    /// - `FORGE_REMOTE_PORT`: Remote server port (default: 4460)
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env`](Self::apply_env) with an explicit variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = lookup("FORGE_MAX_PARALLEL_COUNT") {
            self.executor.max_parallel_count = parse_env_value(&val, "FORGE_MAX_PARALLEL_COUNT")?;
        }

        if let Some(val) = lookup("FORGE_MAX_EXECUTION_ATTEMPTS") {
            self.executor.max_execution_attempts = parse_env_value(&val, "FORGE_MAX_EXECUTION_ATTEMPTS")?;
        }

        if let Some(val) = lookup("FORGE_IS_CRASHED_ON_ERROR") {
            self.executor.is_crashed_on_error = parse_env_bool(&val, "FORGE_IS_CRASHED_ON_ERROR")?;
        }

        if let Some(val) = lookup("FORGE_MAX_SCRAPING_DEPTH") {
            self.preparation.max_scraping_depth = parse_env_value(&val, "FORGE_MAX_SCRAPING_DEPTH")?;
        }

        if let Some(val) = lookup("FORGE_MAX_SCRAPING_TOTAL") {
            self.preparation.max_scraping_total = parse_env_value(&val, "FORGE_MAX_SCRAPING_TOTAL")?;
        }

        if let Some(val) = lookup("FORGE_KEYWORD_COUNT") {
            self.preparation.keyword_count = parse_env_value(&val, "FORGE_KEYWORD_COUNT")?;
        }

        if let Some(val) = lookup("FORGE_KNOWLEDGE_ROOT") {
            self.preparation.root_dir = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("FORGE_CACHE_KIND") {
            self.cache.kind = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "FORGE_CACHE_KIND".to_string(),
                message,
            })?;
        }

        if let Some(val) = lookup("FORGE_CACHE_DIR") {
            self.cache.dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("FORGE_CACHE_RELOAD") {
            self.cache.is_reloaded = parse_env_bool(&val, "FORGE_CACHE_RELOAD")?;
        }

        if let Some(val) = lookup("FORGE_REMOTE_HOST") {
            self.remote.host = val;
        }

        if let Some(val) = lookup("FORGE_REMOTE_PORT") {
            self.remote.port = parse_env_value(&val, "FORGE_REMOTE_PORT")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_parallel_count == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel_count must be greater than 0".to_string(),
            ));
        }

        if self.executor.max_execution_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_execution_attempts must be greater than 0".to_string(),
            ));
        }

        if self.preparation.max_scraping_depth == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_scraping_depth must be greater than 0".to_string(),
            ));
        }

        if self.preparation.max_scraping_total == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_scraping_total must be greater than 0".to_string(),
            ));
        }

        if self.cache.kind != CacheKind::None
            && self.cache.kind != CacheKind::Memory
            && self.cache.dir.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "cache dir cannot be empty for a persistent cache".to_string(),
            ));
        }

        if self.remote.host.is_empty() {
            return Err(ConfigError::ValidationFailed("remote host cannot be empty".to_string()));
        }

        if let Some(tools) = self.tools.iter().find(|t| t.provider.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(format!(
                "tools provider cannot be empty (options: {})",
                tools.options
            )));
        }

        Ok(())
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions::default()
            .with_max_parallel_count(self.executor.max_parallel_count)
            .with_max_execution_attempts(self.executor.max_execution_attempts)
            .with_crash_on_error(self.executor.is_crashed_on_error)
            .with_prepare_options(self.prepare_options())
    }

    pub fn prepare_options(&self) -> PrepareOptions {
        let mut options = PrepareOptions::default()
            .with_max_scraping_depth(self.preparation.max_scraping_depth)
            .with_max_scraping_total(self.preparation.max_scraping_total)
            .with_crash_on_error(self.preparation.is_crashed_on_error);
        options.keyword_count = self.preparation.keyword_count;
        options.root_dir = self.preparation.root_dir.clone();
        options
    }

    /// Builder method to set the parallel template limit.
    pub fn with_max_parallel_count(mut self, count: usize) -> Self {
        self.executor.max_parallel_count = count;
        self
    }

    /// Builder method to set the attempt limit.
    pub fn with_max_execution_attempts(mut self, attempts: usize) -> Self {
        self.executor.max_execution_attempts = attempts;
        self
    }

    pub fn with_cache_kind(mut self, kind: CacheKind) -> Self {
        self.cache.kind = kind;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache.dir = dir.into();
        self
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote.port = port;
        self
    }

    pub fn with_tools(mut self, tools: ToolsConfiguration) -> Self {
        self.tools.push(tools);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
