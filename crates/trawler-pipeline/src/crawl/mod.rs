//! The `mcp-tool-crawler` workflow.
//!
//! ```text
//! InitializeSources ─► GetSourcesToCrawl ─► CheckSourcesExist
//!        │                                        │
//!  (initializationError)                          ▼
//!                      NotifyCrawlComplete ◄─ ProcessCatalog ◄─ MapSourcesToProcess
//!                        (notifyError)                            (crawlError)
//!                                                                      │
//!                                              run_all ─► SourceCrawler per source
//!                                                         fetch ─► strategy ─► sandbox ─► tools
//! ```
//!
//! Steps with a catch key in parentheses absorb their final failure into the
//! state bag; the others fail the execution.

mod source;
mod steps;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trawler_catalog::{
    DocumentFetcher, SeedList, SourceStore, StrategyProvider, StrategyStore, ToolStore,
};
use trawler_sandbox::{ExtractedRecord, SandboxResult, StrategySandbox};

use crate::policy::{CatchPolicy, RetryPolicy};
use crate::registry::WorkflowDefinition;
use crate::step::{StepTemplate, step_fn};
use crate::Result;

pub use source::{CrawlOutcome, CrawlSummary, CrawlTask, SourceCrawler};

/// Registered name of the crawl workflow.
pub const CRAWL_WORKFLOW: &str = "mcp-tool-crawler";

pub const INITIALIZE_SOURCES: &str = "InitializeSources";
pub const GET_SOURCES_TO_CRAWL: &str = "GetSourcesToCrawl";
pub const CHECK_SOURCES_EXIST: &str = "CheckSourcesExist";
pub const MAP_SOURCES_TO_PROCESS: &str = "MapSourcesToProcess";
pub const PROCESS_CATALOG: &str = "ProcessCatalog";
pub const NOTIFY_CRAWL_COMPLETE: &str = "NotifyCrawlComplete";

/// Runs extraction strategies. Implemented by [`StrategySandbox`].
#[async_trait]
pub trait StrategyRunner: Send + Sync {
    async fn run(&self, implementation: &str, document: &str) -> SandboxResult<Vec<ExtractedRecord>>;

    /// Reject an implementation that would not compile, without running it.
    fn check(&self, implementation: &str) -> SandboxResult<()>;
}

#[async_trait]
impl StrategyRunner for StrategySandbox {
    async fn run(&self, implementation: &str, document: &str) -> SandboxResult<Vec<ExtractedRecord>> {
        self.execute(implementation, document).await
    }

    fn check(&self, implementation: &str) -> SandboxResult<()> {
        StrategySandbox::check(self, implementation)
    }
}

/// Collaborators used by the crawl steps.
#[derive(Clone)]
pub struct CrawlDeps {
    pub sources: Arc<dyn SourceStore>,
    pub tools: Arc<dyn ToolStore>,
    pub strategies: Arc<dyn StrategyStore>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub runner: Arc<dyn StrategyRunner>,
    /// Strategy generation for sources without a known crawler. `None`
    /// disables generation; such sources then fail their crawl.
    pub provider: Option<Arc<dyn StrategyProvider>>,
}

impl CrawlDeps {
    /// Use one catalog for sources, tools and strategies.
    pub fn from_catalog<C>(
        catalog: Arc<C>,
        fetcher: Arc<dyn DocumentFetcher>,
        runner: Arc<dyn StrategyRunner>,
    ) -> Self
    where
        C: SourceStore + ToolStore + StrategyStore + 'static,
    {
        Self {
            sources: catalog.clone(),
            tools: catalog.clone(),
            strategies: catalog,
            fetcher,
            runner,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn StrategyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

impl std::fmt::Debug for CrawlDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlDeps")
            .field("provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

/// Tunables of the crawl workflow.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Sources registered by `InitializeSources` on every run.
    pub seeds: SeedList,
    /// Used when the input has no `timeThreshold`.
    pub default_threshold_hours: u64,
    /// Used when the input has no `concurrencyLimit`.
    pub concurrency_limit: usize,
    /// Retry policy of the retrying steps.
    pub step_retry: RetryPolicy,
    /// Retry policy of each source crawl inside `MapSourcesToProcess`.
    pub task_retry: RetryPolicy,
    /// Per-attempt limit for every step.
    pub step_timeout: Option<Duration>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            seeds: SeedList::default(),
            default_threshold_hours: 24,
            concurrency_limit: 5,
            step_retry: RetryPolicy::default(),
            task_retry: RetryPolicy::default(),
            step_timeout: None,
        }
    }
}

/// Shared by every step of the workflow.
struct CrawlContext {
    deps: CrawlDeps,
    settings: CrawlSettings,
    crawler: Arc<SourceCrawler>,
}

/// Build the crawl workflow definition.
pub fn crawl_workflow(deps: CrawlDeps, settings: CrawlSettings) -> Result<WorkflowDefinition> {
    let crawler = Arc::new(SourceCrawler::new(deps.clone(), settings.task_retry));
    let ctx = Arc::new(CrawlContext {
        deps,
        settings,
        crawler,
    });
    let retry = ctx.settings.step_retry;
    let timeout = ctx.settings.step_timeout;

    macro_rules! step {
        ($name:expr, $func:path) => {{
            let ctx = Arc::clone(&ctx);
            StepTemplate::new(
                $name,
                step_fn(move |state| {
                    let ctx = Arc::clone(&ctx);
                    async move { $func(&ctx, state).await }
                }),
            )
            .with_retry_policy(retry)
            .with_attempt_timeout(timeout)
        }};
    }

    let steps = vec![
        step!(INITIALIZE_SOURCES, steps::initialize_sources)
            .with_catch(CatchPolicy::from_path("$.initializationError")),
        step!(GET_SOURCES_TO_CRAWL, steps::get_sources_to_crawl),
        step!(CHECK_SOURCES_EXIST, steps::check_sources_exist),
        step!(MAP_SOURCES_TO_PROCESS, steps::map_sources_to_process)
            .with_catch(CatchPolicy::from_path("$.crawlError")),
        step!(PROCESS_CATALOG, steps::process_catalog),
        step!(NOTIFY_CRAWL_COMPLETE, steps::notify_crawl_complete)
            .with_catch(CatchPolicy::from_path("$.notifyError")),
    ];

    WorkflowDefinition::new(CRAWL_WORKFLOW, steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawler_catalog::{MemoryCatalog, StaticStrategyProvider};

    #[test]
    fn test_every_step_uses_step_retry() {
        let catalog = Arc::new(MemoryCatalog::new());
        let deps = CrawlDeps::from_catalog(
            catalog,
            Arc::new(trawler_catalog::HttpFetcher::new(Default::default()).unwrap()),
            Arc::new(StrategySandbox::new(Default::default())),
        )
        .with_provider(Arc::new(StaticStrategyProvider::new("fn extract_tools(html) { [] }")));
        let settings = CrawlSettings {
            step_retry: RetryPolicy::new(4, 1.5, 3.0).unwrap(),
            ..CrawlSettings::default()
        };

        let workflow = crawl_workflow(deps, settings.clone()).unwrap();

        let names: Vec<_> = workflow.steps().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                INITIALIZE_SOURCES,
                GET_SOURCES_TO_CRAWL,
                CHECK_SOURCES_EXIST,
                MAP_SOURCES_TO_PROCESS,
                PROCESS_CATALOG,
                NOTIFY_CRAWL_COMPLETE,
            ]
        );
        for step in workflow.steps() {
            assert_eq!(step.retry_policy(), &settings.step_retry, "{}", step.name());
        }
        let caught: Vec<_> = workflow
            .steps()
            .iter()
            .filter_map(|s| s.catch_policy().map(|c| c.error_key().to_string()))
            .collect();
        assert_eq!(caught, vec!["initializationError", "crawlError", "notifyError"]);
    }
}
