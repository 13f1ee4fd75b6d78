//! Error types for the pipeline engine.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `start` was called with a workflow name nobody registered.
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    /// Invalid workflow definition.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Retry or catch policy outside its allowed range.
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// A step's work function failed.
    #[error("Step failed: {0}")]
    StepFailed(String),

    /// A single attempt ran past the step's attempt timeout.
    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(std::time::Duration),

    /// Execution id unknown to the store.
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// `wait` gave up before the execution reached a terminal status.
    #[error("Timed out waiting for execution {0}")]
    WaitTimeout(String),

    /// Execution store failure.
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Catalog(#[from] trawler_catalog::CatalogError),

    #[error(transparent)]
    Sandbox(#[from] trawler_sandbox::SandboxError),
}

impl PipelineError {
    /// Convenience constructor for work-function failures.
    pub fn step(message: impl Into<String>) -> Self {
        PipelineError::StepFailed(message.into())
    }
}
