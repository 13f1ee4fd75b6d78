//! In-memory catalog, for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;

use crate::Result;
use crate::models::{CrawlStatus, CrawlerStrategy, SaveSummary, Source, Tool};
use crate::storage::{SourceStore, StrategyStore, ToolStore};

/// Catalog held entirely in process memory.
///
/// Sources keep insertion order so listings are stable.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    sources: RwLock<Vec<Source>>,
    tools: RwLock<Vec<Tool>>,
    strategies: RwLock<HashMap<String, CrawlerStrategy>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with `sources`.
    pub fn with_sources(sources: Vec<Source>) -> Self {
        Self {
            sources: RwLock::new(sources),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SourceStore for MemoryCatalog {
    async fn list_all(&self) -> Result<Vec<Source>> {
        Ok(self.sources.read().clone())
    }

    async fn list_due_for_crawl(&self, threshold: Duration) -> Result<Vec<Source>> {
        let now = Utc::now();
        Ok(self
            .sources
            .read()
            .iter()
            .filter(|s| s.is_due(now, threshold))
            .cloned()
            .collect())
    }

    async fn record_crawl_outcome(&self, source_id: &str, success: bool) -> Result<bool> {
        let mut sources = self.sources.write();
        match sources.iter_mut().find(|s| s.id == source_id) {
            Some(source) => {
                source.last_crawled = Some(Utc::now());
                source.last_crawl_status = Some(CrawlStatus::from_success(success));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_many(&self, new_sources: &[Source]) -> Result<usize> {
        let mut sources = self.sources.write();
        for source in new_sources {
            match sources.iter_mut().find(|s| s.id == source.id) {
                Some(existing) => *existing = source.clone(),
                None => sources.push(source.clone()),
            }
        }
        Ok(new_sources.len())
    }

    async fn get(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.read().iter().find(|s| s.id == id).cloned())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Source>> {
        Ok(self.sources.read().iter().find(|s| s.url == url).cloned())
    }

    async fn set_crawler_id(&self, source_id: &str, crawler_id: &str) -> Result<bool> {
        let mut sources = self.sources.write();
        match sources.iter_mut().find(|s| s.id == source_id) {
            Some(source) => {
                source.crawler_id = Some(crawler_id.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ToolStore for MemoryCatalog {
    async fn save_many(&self, new_tools: &[Tool]) -> Result<SaveSummary> {
        let mut tools = self.tools.write();
        let mut summary = SaveSummary::default();
        for tool in new_tools {
            match tools.iter_mut().find(|t| t.url == tool.url) {
                Some(existing) => {
                    existing.name = tool.name.clone();
                    existing.description = tool.description.clone();
                    existing.metadata = tool.metadata.clone();
                    existing.last_updated = tool.last_updated;
                    summary.updated += 1;
                }
                None => {
                    tools.push(tool.clone());
                    summary.inserted += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn list_all(&self) -> Result<Vec<Tool>> {
        Ok(self.tools.read().clone())
    }
}

#[async_trait]
impl StrategyStore for MemoryCatalog {
    async fn get(&self, id: &str) -> Result<Option<CrawlerStrategy>> {
        Ok(self.strategies.read().get(id).cloned())
    }

    async fn save(&self, strategy: &CrawlerStrategy) -> Result<()> {
        self.strategies
            .write()
            .insert(strategy.id.clone(), strategy.clone());
        Ok(())
    }
}
