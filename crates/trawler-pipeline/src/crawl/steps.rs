//! Work functions of the crawl workflow steps.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};
use trawler_catalog::{SeedList, Source, seed_sources};

use super::source::{CrawlOutcome, CrawlSummary, CrawlTask};
use super::CrawlContext;
use crate::batch::run_all;
use crate::state::{self, StateBag};
use crate::{PipelineError, Result};

fn delta(value: Value) -> StateBag {
    state::from_value(value)
}

/// Register configured seeds, plus those of an optional `sourcesFile`.
pub(super) async fn initialize_sources(ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    let mut seeds = ctx.settings.seeds.clone();
    if let Some(path) = state::get_str(&state, "sourcesFile") {
        info!(path, "Loading sources file");
        seeds.extend(SeedList::from_file(path)?);
    }

    let added = seed_sources(ctx.deps.sources.as_ref(), &seeds).await?;
    let total = ctx.deps.sources.list_all().await?.len();
    info!(added = added.len(), total, "Sources initialized");

    Ok(delta(json!({
        "sourceCount": total,
        "sourcesAdded": added.len(),
        "message": format!("Initialized {total} sources successfully"),
    })))
}

/// Sources due for a crawl under `timeThreshold` hours.
pub(super) async fn get_sources_to_crawl(ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    let hours = state::get_u64(&state, "timeThreshold").unwrap_or(ctx.settings.default_threshold_hours);
    let threshold = i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| PipelineError::step(format!("timeThreshold out of range: {hours}")))?;

    let due = ctx.deps.sources.list_due_for_crawl(threshold).await?;
    info!(count = due.len(), hours, "Found sources to crawl");
    Ok(delta(json!({ "sources": due })))
}

pub(super) async fn check_sources_exist(_ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    let count = state
        .get("sources")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    if count == 0 {
        info!("No sources to crawl");
        return Ok(delta(json!({
            "sourcesExist": false,
            "message": "No sources to crawl",
        })));
    }
    info!(count, "Sources to process");
    Ok(delta(json!({ "sourcesExist": true })))
}

/// Crawl every due source under the concurrency limit.
pub(super) async fn map_sources_to_process(ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    if !state::get_bool(&state, "sourcesExist").unwrap_or(false) {
        info!("No sources to process, skipping");
        return Ok(delta(json!({ "crawlResults": [] })));
    }

    let sources: Vec<Source> = match state.get("sources") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    if sources.is_empty() {
        return Ok(delta(json!({ "crawlResults": [] })));
    }

    let limit = state::get_u64(&state, "concurrencyLimit")
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(ctx.settings.concurrency_limit);
    info!(count = sources.len(), limit, "Processing sources");

    let urls: HashMap<String, String> = sources
        .iter()
        .map(|s| (s.id.clone(), s.url.clone()))
        .collect();
    let tasks = sources.into_iter().map(|source| CrawlTask { source }).collect();
    let crawler = Arc::clone(&ctx.crawler);

    let results = run_all(tasks, limit, move |task: CrawlTask| {
        let crawler = Arc::clone(&crawler);
        async move { Ok::<_, Infallible>(crawler.crawl(task.source).await) }
    })
    .await;

    let mut outcomes = Vec::with_capacity(results.len());
    for result in results {
        match result.result {
            Ok(outcome) => outcomes.push(outcome),
            Err(error) => {
                // Only reachable when a crawl panicked.
                warn!(source_id = %result.task_id, %error, "Source crawl aborted");
                if let Err(e) = ctx.deps.sources.record_crawl_outcome(&result.task_id, false).await {
                    warn!(source_id = %result.task_id, error = %e, "Failed to record crawl outcome");
                }
                let url = urls.get(&result.task_id).cloned().unwrap_or_default();
                outcomes.push(CrawlOutcome::failed(result.task_id, url, error));
            }
        }
    }

    Ok(delta(json!({ "crawlResults": outcomes })))
}

/// Aggregate the crawl results into a summary.
pub(super) async fn process_catalog(ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    let outcomes: Vec<CrawlOutcome> = match state.get("crawlResults") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    let summary = CrawlSummary::from_outcomes(&outcomes);
    let catalog_size = ctx.deps.tools.list_all().await?.len();

    if outcomes.is_empty() {
        info!("No crawl results to process");
        return Ok(delta(json!({
            "catalogProcessed": false,
            "message": "No crawl results to process",
            "summary": summary,
            "catalogSize": catalog_size,
        })));
    }

    info!(
        total = summary.total_sources,
        success = summary.success_count,
        failed = summary.failure_count,
        tools = summary.total_tools,
        new = summary.new_tools,
        updated = summary.updated_tools,
        catalog_size,
        "Processed catalog"
    );
    Ok(delta(json!({
        "catalogProcessed": true,
        "summary": summary,
        "catalogSize": catalog_size,
    })))
}

pub(super) async fn notify_crawl_complete(_ctx: &CrawlContext, state: StateBag) -> Result<StateBag> {
    let summary = state.get("summary").cloned().unwrap_or_else(|| json!({}));
    info!(%summary, "Crawl complete");
    Ok(delta(json!({
        "notified": true,
        "message": "MCP Tool Crawler completed",
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
