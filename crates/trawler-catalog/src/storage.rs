//! Collaborator traits consumed by the crawl pipeline.
//!
//! # Architecture
//!
//! ```text
//! SourceStore (trait)        - Sources and their last-crawl bookkeeping
//! ToolStore (trait)          - Discovered tools, unique by URL
//! StrategyStore (trait)      - Generated extraction strategies
//!     └── SqliteCatalog      - SQLite implementation of all three
//!     └── MemoryCatalog      - In-memory implementation for tests
//!
//! StrategyProvider (trait)   - Produces strategy text for an unknown source
//!     └── OpenAiStrategyProvider
//!     └── StaticStrategyProvider
//!
//! DocumentFetcher (trait)    - Retrieves a remote document as text
//!     └── HttpFetcher
//! ```

use async_trait::async_trait;
use chrono::Duration;

use crate::Result;
use crate::models::{CrawlerStrategy, SaveSummary, Source, Tool};

#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Every known source.
    async fn list_all(&self) -> Result<Vec<Source>>;

    /// Sources never crawled or last crawled more than `threshold` ago.
    async fn list_due_for_crawl(&self, threshold: Duration) -> Result<Vec<Source>>;

    /// Stamp `last_crawled` with now and set the crawl status.
    ///
    /// Returns `false` when the source does not exist.
    async fn record_crawl_outcome(&self, source_id: &str, success: bool) -> Result<bool>;

    /// Insert or replace sources by id. Returns how many were written.
    async fn save_many(&self, sources: &[Source]) -> Result<usize>;

    async fn get(&self, id: &str) -> Result<Option<Source>>;

    async fn get_by_url(&self, url: &str) -> Result<Option<Source>>;

    /// Bind a generated strategy to a source. Returns `false` when the source
    /// does not exist.
    async fn set_crawler_id(&self, source_id: &str, crawler_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Upsert tools by URL. Existing tools keep their id and `first_discovered`.
    async fn save_many(&self, tools: &[Tool]) -> Result<SaveSummary>;

    async fn list_all(&self) -> Result<Vec<Tool>>;
}

#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<CrawlerStrategy>>;

    async fn save(&self, strategy: &CrawlerStrategy) -> Result<()>;
}

/// Produces extraction strategy text for a source without a known crawler.
#[async_trait]
pub trait StrategyProvider: Send + Sync {
    /// Generate a strategy for `source`, given a preview of its document.
    ///
    /// Any failure is reported as [`CatalogError::GenerationFailed`](crate::CatalogError::GenerationFailed).
    async fn generate(&self, source: &Source, document: &str) -> Result<String>;
}

/// Retrieves remote documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}
