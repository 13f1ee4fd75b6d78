//! Workflow orchestration engine for trawler.
//!
//! Runs multi-step workflows with per-step retry and backoff, absorbs or
//! propagates step failures according to each step's catch policy, persists
//! a snapshot after every state transition and fans per-source crawl work
//! out under a concurrency cap.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Orchestrator                                           │
//! │  - WorkflowRegistry (name → ordered StepTemplates)      │
//! │  - start() persists a Pending snapshot, spawns the run  │
//! │  - get / list / wait / recover_interrupted              │
//! └───────────────┬─────────────────────────────────────────┘
//!                 │ tokio::spawn
//! ┌───────────────▼─────────────────────────────────────────┐
//! │  Execution (one per run, owns its StateBag and Steps)   │
//! │  - Step attempt loop: RetryPolicy backoff, CatchPolicy  │
//! │  - full snapshot → ExecutionStore on every transition   │
//! └───────────────┬─────────────────────────────────────────┘
//!                 │ MapSourcesToProcess
//! ┌───────────────▼─────────────────────────────────────────┐
//! │  batch::run_all (Semaphore + JoinSet)                   │
//! │  └── SourceCrawler: fetch → strategy → sandbox → tools  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod batch;
pub mod crawl;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod step;
pub mod store;

pub use batch::{BatchTask, TaskOutcome, run_all};
pub use crawl::{
    CRAWL_WORKFLOW, CrawlDeps, CrawlOutcome, CrawlSettings, CrawlSummary, CrawlTask,
    SourceCrawler, StrategyRunner, crawl_workflow,
};
pub use error::{PipelineError, Result};
pub use execution::Execution;
pub use orchestrator::{Orchestrator, StartedExecution};
pub use policy::{CatchPolicy, RetryPolicy};
pub use registry::{WorkflowDefinition, WorkflowRegistry};
pub use snapshot::{
    ExecutionFilter, ExecutionId, ExecutionRecord, ExecutionSnapshot, StepId, StepRecord,
    StepStatus, WorkflowStatus,
};
pub use state::StateBag;
pub use step::{Step, StepFn, StepObserver, StepOutcome, StepTemplate, step_fn};
pub use store::{ExecutionStore, MemoryExecutionStore, SqliteExecutionStore};
