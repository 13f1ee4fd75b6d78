//! Catalog model and the collaborators the crawl pipeline talks to.
//!
//! The pipeline only sees the traits in [`storage`]; this crate also ships
//! the concrete implementations used by the CLI (SQLite, HTTP, OpenAI) and
//! an in-memory catalog for tests.

pub mod error;
pub mod fetcher;
pub mod generator;
pub mod known;
pub mod memory;
pub mod models;
pub mod seed;
pub mod sqlite;
pub mod storage;

pub use error::{CatalogError, Result};
pub use fetcher::{FetchConfig, HttpFetcher};
pub use generator::{GeneratorConfig, OpenAiStrategyProvider, StaticStrategyProvider};
pub use memory::MemoryCatalog;
pub use models::{CrawlStatus, CrawlerStrategy, SaveSummary, Source, SourceType, Tool};
pub use seed::{SeedList, SeedSource, add_source_by_url, seed_sources};
pub use sqlite::SqliteCatalog;
pub use storage::{DocumentFetcher, SourceStore, StrategyProvider, StrategyStore, ToolStore};
