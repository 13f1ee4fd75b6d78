//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [storage]                  # data directory and database file
//! [crawler]                  # fetch and fan-out settings
//! [sandbox]                  # strategy evaluation budgets
//! [retry.step]               # default retry policy for pipeline steps
//! [retry.task]               # retry policy for each source inside the fan-out
//! [generator]                # OpenAI-compatible strategy generation
//! [logging]                  # file logging
//! [[sources.awesome_lists]]  # seed sources
//! [[sources.websites]]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrawlerConfig {
    pub storage: Option<StorageConfig>,
    pub crawler: Option<CrawlerConfig>,
    pub sandbox: Option<SandboxSection>,
    pub retry: Option<RetrySection>,
    pub generator: Option<GeneratorSection>,
    pub logging: Option<LoggingConfig>,
    pub sources: Option<SourcesConfig>,
}

impl TrawlerConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: TrawlerConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale, not merged field by field.
    pub fn merge(&mut self, other: TrawlerConfig) {
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.crawler.is_some() {
            self.crawler = other.crawler;
        }
        if other.sandbox.is_some() {
            self.sandbox = other.sandbox;
        }
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.generator.is_some() {
            self.generator = other.generator;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if other.sources.is_some() {
            self.sources = other.sources;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let crawler = self.crawler();
        if crawler.concurrency_limit == 0 {
            return Err(invalid("crawler.concurrency_limit", "must be at least 1"));
        }
        let retry = self.retry();
        retry.step.validate("retry.step")?;
        retry.task.validate("retry.task")?;
        Ok(())
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn crawler(&self) -> CrawlerConfig {
        self.crawler.clone().unwrap_or_default()
    }

    pub fn sandbox(&self) -> SandboxSection {
        self.sandbox.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetrySection {
        self.retry.clone().unwrap_or_default()
    }

    pub fn generator(&self) -> GeneratorSection {
        self.generator.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn sources(&self) -> SourcesConfig {
        self.sources.clone().unwrap_or_default()
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Where trawler keeps its database and logs.
///
/// ```toml
/// [storage]
/// data_dir = "/var/lib/trawler"
/// database = "trawler.db"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory. Defaults to the platform data dir + `trawler`.
    pub data_dir: Option<PathBuf>,
    /// Database file name, relative to the data directory.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: PathBuf::from("trawler.db"),
        }
    }
}

impl StorageConfig {
    /// The configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("trawler"))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    /// Full path of the database file.
    pub fn database_path(&self) -> Result<PathBuf> {
        if self.database.is_absolute() {
            return Ok(self.database.clone());
        }
        Ok(self.resolve_data_dir()?.join(&self.database))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Crawler
// ─────────────────────────────────────────────────────────────────────────────

/// Fetch and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum sources crawled at once.
    pub concurrency_limit: usize,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    /// Fetched documents are truncated to this many bytes.
    pub max_document_bytes: usize,
    /// Sources crawled more recently than this are skipped.
    pub recrawl_threshold_hours: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            user_agent: "MCP-Tool-Crawler/1.0".to_string(),
            fetch_timeout_secs: 30,
            max_document_bytes: 512 * 1024,
            recrawl_threshold_hours: 24,
        }
    }
}

impl CrawlerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy evaluation budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub timeout_ms: u64,
    pub max_operations: u64,
    pub max_records: usize,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: 50_000_000,
            max_records: 10_000,
        }
    }
}

impl SandboxSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Retry settings for pipeline steps and per-source crawl tasks.
///
/// ```toml
/// [retry]
/// step_timeout_secs = 600
///
/// [retry.step]
/// max_attempts = 3
/// initial_interval_secs = 2.0
/// backoff_rate = 2.0
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub step: RetrySettings,
    pub task: RetrySettings,
    /// Per-attempt timeout for pipeline steps. Unset means no limit.
    pub step_timeout_secs: Option<u64>,
}

/// One retry policy in config form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_interval_secs: f64,
    pub backoff_rate: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_secs: 2.0,
            backoff_rate: 2.0,
        }
    }
}

impl RetrySettings {
    fn validate(&self, field: &str) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(invalid(&format!("{field}.max_attempts"), "must be at least 1"));
        }
        if self.initial_interval_secs.is_nan() || self.initial_interval_secs < 0.0 {
            return Err(invalid(
                &format!("{field}.initial_interval_secs"),
                "must be non-negative",
            ));
        }
        if self.backoff_rate.is_nan() || self.backoff_rate < 1.0 {
            return Err(invalid(&format!("{field}.backoff_rate"), "must be at least 1.0"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible strategy generation.
///
/// The API key is read from `api_key_env` unless `api_key` is set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl GeneratorSection {
    /// Inline key first, then the environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()))
    }

    pub fn has_plaintext_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// File logging settings. Console logging is always on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write JSON logs to daily files.
    pub file: bool,
    /// Log directory. Defaults to `<data_dir>/logs`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            directory: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// Seed sources registered by the first pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub awesome_lists: Vec<SourceEntry>,
    pub websites: Vec<SourceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SourceEntry {
    fn url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            name: None,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            awesome_lists: vec![
                SourceEntry::url("https://github.com/jpmcb/awesome-machine-context-protocol"),
                SourceEntry::url("https://github.com/continuedev/awesome-continue"),
                SourceEntry::url("https://github.com/wong2/awesome-mcp-servers"),
            ],
            websites: vec![SourceEntry {
                url: "https://mcp-api.org/tools".to_string(),
                name: Some("MCP API.org Tools Directory".to_string()),
            }],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
