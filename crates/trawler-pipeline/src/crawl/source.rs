//! Crawling a single source.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use trawler_catalog::known::{AWESOME_LIST_STRATEGY, AWESOME_LIST_STRATEGY_ID, document_urls};
use trawler_catalog::{CrawlerStrategy, SaveSummary, Source, Tool};
use trawler_sandbox::ExtractedRecord;

use super::CrawlDeps;
use crate::batch::BatchTask;
use crate::policy::RetryPolicy;
use crate::{PipelineError, Result};

/// One source handed to the batch runner.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub source: Source,
}

impl BatchTask for CrawlTask {
    fn task_id(&self) -> String {
        self.source.id.clone()
    }
}

/// What happened to one source during a crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub source_id: String,
    pub source_url: String,
    pub success: bool,
    pub tools_discovered: usize,
    pub new_tools: usize,
    pub updated_tools: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CrawlOutcome {
    pub fn failed(source_id: impl Into<String>, source_url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_url: source_url.into(),
            success: false,
            tools_discovered: 0,
            new_tools: 0,
            updated_tools: 0,
            duration_ms: 0,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Totals over a set of outcomes. Only successful outcomes count toward tools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub total_sources: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_tools: usize,
    pub new_tools: usize,
    pub updated_tools: usize,
}

impl CrawlSummary {
    pub fn from_outcomes(outcomes: &[CrawlOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, outcome| {
            acc.total_sources += 1;
            if outcome.success {
                acc.success_count += 1;
                acc.total_tools += outcome.tools_discovered;
                acc.new_tools += outcome.new_tools;
                acc.updated_tools += outcome.updated_tools;
            } else {
                acc.failure_count += 1;
            }
            acc
        })
    }
}

/// Fetch, extract and store the tools of one source, retrying the whole
/// sequence per the task retry policy.
pub struct SourceCrawler {
    deps: CrawlDeps,
    retry: RetryPolicy,
}

impl SourceCrawler {
    pub fn new(deps: CrawlDeps, retry: RetryPolicy) -> Self {
        Self { deps, retry }
    }

    /// Crawl `source` and record the outcome on it.
    ///
    /// Never fails: errors end up in the returned outcome.
    pub async fn crawl(&self, mut source: Source) -> CrawlOutcome {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts();
        info!(source_id = %source.id, url = %source.url, name = %source.name, "Crawling source");

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.crawl_once(&mut source).await {
                Ok(found) => break Ok(found),
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        source_id = %source.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Source crawl attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let success = result.is_ok();
        if let Err(e) = self.deps.sources.record_crawl_outcome(&source.id, success).await {
            warn!(source_id = %source.id, error = %e, "Failed to record crawl outcome");
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match result {
            Ok((discovered, saved)) => {
                info!(
                    source_id = %source.id,
                    discovered,
                    new = saved.inserted,
                    updated = saved.updated,
                    duration_ms,
                    "Source crawled"
                );
                CrawlOutcome {
                    source_id: source.id,
                    source_url: source.url,
                    success: true,
                    tools_discovered: discovered,
                    new_tools: saved.inserted,
                    updated_tools: saved.updated,
                    duration_ms,
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                warn!(source_id = %source.id, attempts = attempt, error = %e, "Source crawl failed");
                let mut outcome = CrawlOutcome::failed(source.id, source.url, e.to_string());
                outcome.duration_ms = duration_ms;
                outcome
            }
        }
    }

    async fn crawl_once(&self, source: &mut Source) -> Result<(usize, SaveSummary)> {
        let document = self.fetch_document(source).await?;
        let implementation = self.resolve_strategy(source, &document).await?;
        let records = self.deps.runner.run(&implementation, &document).await?;

        let source = &*source;
        let tools: Vec<Tool> = records
            .into_iter()
            .map(|record| record_to_tool(record, source))
            .collect();
        if tools.is_empty() {
            return Ok((0, SaveSummary::default()));
        }
        let saved = self.deps.tools.save_many(&tools).await?;
        Ok((tools.len(), saved))
    }

    /// First document that fetches successfully among the source's candidate URLs.
    async fn fetch_document(&self, source: &Source) -> Result<String> {
        let mut last_error = None;
        for url in document_urls(source) {
            match self.deps.fetcher.fetch(&url).await {
                Ok(document) => {
                    debug!(source_id = %source.id, %url, bytes = document.len(), "Fetched document");
                    return Ok(document);
                }
                Err(e) => {
                    debug!(source_id = %source.id, %url, error = %e, "Fetch failed");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => e.into(),
            None => PipelineError::step(format!("no document URL for {}", source.url)),
        })
    }

    /// Strategy text for `source`: the built-in one for known sources, the
    /// stored one when bound, otherwise a freshly generated and saved one.
    async fn resolve_strategy(&self, source: &mut Source, document: &str) -> Result<String> {
        if source.has_known_crawler {
            debug!(source_id = %source.id, strategy = AWESOME_LIST_STRATEGY_ID, "Using built-in strategy");
            return Ok(AWESOME_LIST_STRATEGY.to_string());
        }

        if let Some(crawler_id) = source.crawler_id.as_deref() {
            match self.deps.strategies.get(crawler_id).await? {
                Some(strategy) => return Ok(strategy.implementation),
                None => warn!(source_id = %source.id, crawler_id, "Bound strategy missing, regenerating"),
            }
        }

        let provider = self.deps.provider.as_ref().ok_or_else(|| {
            PipelineError::step(format!(
                "no crawler for {} and strategy generation is disabled",
                source.url
            ))
        })?;
        let implementation = provider.generate(source, document).await?;
        self.deps.runner.check(&implementation)?;

        let strategy = CrawlerStrategy::new(
            source,
            implementation.clone(),
            format!("Generated crawler for {}", source.name),
        );
        self.deps.strategies.save(&strategy).await?;
        self.deps.sources.set_crawler_id(&source.id, &strategy.id).await?;
        info!(source_id = %source.id, crawler_id = %strategy.id, "Saved generated strategy");
        source.crawler_id = Some(strategy.id);
        Ok(implementation)
    }
}

fn record_to_tool(record: ExtractedRecord, source: &Source) -> Tool {
    let mut metadata: Map<String, Value> = record.extra;
    if !record.tags.is_empty() {
        metadata.insert(
            "tags".to_string(),
            Value::Array(record.tags.into_iter().map(Value::String).collect()),
        );
    }
    metadata.insert("source_name".to_string(), Value::String(source.name.clone()));
    Tool::new(record.name, record.description, record.url, source.url.clone()).with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, discovered: usize, new: usize, updated: usize) -> CrawlOutcome {
        CrawlOutcome {
            source_id: "s".into(),
            source_url: "https://s.dev".into(),
            success,
            tools_discovered: discovered,
            new_tools: new,
            updated_tools: updated,
            duration_ms: 1,
            error: (!success).then(|| "boom".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts_only_successes() {
        let summary = CrawlSummary::from_outcomes(&[
            outcome(true, 3, 2, 1),
            outcome(false, 9, 9, 9),
            outcome(true, 1, 0, 1),
        ]);
        assert_eq!(
            summary,
            CrawlSummary {
                total_sources: 3,
                success_count: 2,
                failure_count: 1,
                total_tools: 4,
                new_tools: 2,
                updated_tools: 2,
            }
        );
        assert_eq!(CrawlSummary::from_outcomes(&[]), CrawlSummary::default());
    }

    #[test]
    fn test_record_to_tool_metadata() {
        let source = Source::new("https://mcp.so", "MCP.so", trawler_catalog::SourceType::Website);
        let mut extra = Map::new();
        extra.insert("stars".into(), Value::from(12));
        let tool = record_to_tool(
            ExtractedRecord {
                name: "pg".into(),
                description: "Postgres".into(),
                url: "https://pg.dev".into(),
                tags: vec!["database".into()],
                extra,
            },
            &source,
        );
        assert_eq!(tool.source_url, "https://mcp.so");
        assert_eq!(tool.metadata["tags"], serde_json::json!(["database"]));
        assert_eq!(tool.metadata["stars"], serde_json::json!(12));
        assert_eq!(tool.metadata["source_name"], serde_json::json!("MCP.so"));
    }
}
