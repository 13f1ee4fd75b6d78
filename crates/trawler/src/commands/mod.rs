//! CLI command handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use trawler_catalog::{
    FetchConfig, GeneratorConfig, HttpFetcher, OpenAiStrategyProvider, SeedList, SeedSource,
    SqliteCatalog, StrategyProvider,
};
use trawler_config::{RetrySettings, SourceEntry, TrawlerConfig};
use trawler_pipeline::{
    CrawlDeps, CrawlSettings, Orchestrator, RetryPolicy, SqliteExecutionStore, WorkflowRegistry,
    crawl_workflow,
};
use trawler_sandbox::{SandboxConfig, StrategySandbox};

pub mod executions;
pub mod run;
pub mod sources;
pub mod strategy;
pub mod tools;

/// Execution history lives in its own file so the catalog schema version
/// stays independent.
const EXECUTIONS_DB: &str = "executions.db";

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration.
    pub config: TrawlerConfig,
    /// Directory holding the databases.
    pub data_dir: PathBuf,
}

impl Context {
    /// Open the tool catalog.
    pub fn catalog(&self) -> Result<Arc<SqliteCatalog>> {
        let database = self.config.storage().database;
        let path = if database.is_absolute() {
            database
        } else {
            self.data_dir.join(database)
        };
        let catalog = SqliteCatalog::open(&path)
            .with_context(|| format!("opening catalog at {}", path.display()))?;
        Ok(Arc::new(catalog))
    }

    /// Open the execution history.
    pub fn execution_store(&self) -> Result<Arc<SqliteExecutionStore>> {
        let path = self.data_dir.join(EXECUTIONS_DB);
        let store = SqliteExecutionStore::open(&path)
            .with_context(|| format!("opening execution store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn sandbox(&self) -> StrategySandbox {
        let section = self.config.sandbox();
        StrategySandbox::new(
            SandboxConfig::new()
                .with_timeout(section.timeout())
                .with_max_operations(section.max_operations)
                .with_max_records(section.max_records),
        )
    }

    pub fn fetcher(&self) -> Result<HttpFetcher> {
        let crawler = self.config.crawler();
        let fetcher = HttpFetcher::new(FetchConfig {
            timeout: crawler.fetch_timeout(),
            user_agent: crawler.user_agent.clone(),
            max_document_bytes: crawler.max_document_bytes,
        })?;
        Ok(fetcher)
    }

    /// Strategy generator, or `None` when generation is disabled.
    pub fn provider(&self) -> Result<Option<Arc<dyn StrategyProvider>>> {
        let generator = self.config.generator();
        if !generator.enabled {
            return Ok(None);
        }
        let provider = OpenAiStrategyProvider::new(GeneratorConfig {
            base_url: generator.base_url.clone(),
            model: generator.model.clone(),
            api_key: generator.resolve_api_key(),
            timeout: Duration::from_secs(generator.timeout_secs),
        })?;
        Ok(Some(Arc::new(provider)))
    }

    pub fn crawl_settings(&self) -> Result<CrawlSettings> {
        let crawler = self.config.crawler();
        let retry = self.config.retry();
        let sources = self.config.sources();

        Ok(CrawlSettings {
            seeds: SeedList {
                awesome_lists: sources.awesome_lists.into_iter().map(seed).collect(),
                websites: sources.websites.into_iter().map(seed).collect(),
            },
            default_threshold_hours: crawler.recrawl_threshold_hours,
            concurrency_limit: crawler.concurrency_limit,
            step_retry: retry_policy(&retry.step).context("invalid [retry.step]")?,
            task_retry: retry_policy(&retry.task).context("invalid [retry.task]")?,
            step_timeout: retry.step_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Orchestrator with the crawl workflow registered.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let catalog = self.catalog()?;
        let mut deps = CrawlDeps::from_catalog(
            catalog,
            Arc::new(self.fetcher()?),
            Arc::new(self.sandbox()),
        );
        if let Some(provider) = self.provider()? {
            deps = deps.with_provider(provider);
        }

        let workflow = crawl_workflow(deps, self.crawl_settings()?)?;
        let registry = WorkflowRegistry::new().with_workflow(workflow);
        Ok(Orchestrator::new(registry, self.execution_store()?))
    }
}

fn seed(entry: SourceEntry) -> SeedSource {
    SeedSource {
        url: entry.url,
        name: entry.name,
    }
}

fn retry_policy(settings: &RetrySettings) -> Result<RetryPolicy> {
    Ok(RetryPolicy::new(
        settings.max_attempts,
        settings.initial_interval_secs,
        settings.backoff_rate,
    )?)
}

/// Shorten `text` to at most `max` characters.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
