//! Starts executions and answers questions about them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

use crate::execution::{Execution, persist};
use crate::registry::WorkflowRegistry;
use crate::snapshot::{ExecutionFilter, ExecutionId, ExecutionSnapshot, StepStatus, WorkflowStatus};
use crate::state::StateBag;
use crate::store::ExecutionStore;
use crate::{PipelineError, Result};

/// Handle returned by [`Orchestrator::start`].
#[derive(Debug)]
pub struct StartedExecution {
    pub execution_id: ExecutionId,
    /// Always `Pending`: the execution has been scheduled, not run.
    pub status: WorkflowStatus,
    /// Resolves to the final snapshot. Dropping it does not stop the execution.
    pub completion: JoinHandle<ExecutionSnapshot>,
}

/// Creates executions from registered workflows and runs them in the background.
///
/// Holds no per-execution state of its own; everything observable about an
/// execution goes through the [`ExecutionStore`].
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<WorkflowRegistry>,
    store: Arc<dyn ExecutionStore>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workflows", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(registry: WorkflowRegistry, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Build an execution of `workflow_name`, persist it as pending and run
    /// it on the tokio runtime.
    ///
    /// Fails only when the workflow is unknown; execution failures are
    /// reported through the stored snapshot.
    pub async fn start(&self, workflow_name: &str, input: StateBag) -> Result<StartedExecution> {
        let definition = self
            .registry
            .get(workflow_name)
            .ok_or_else(|| PipelineError::UnknownWorkflow(workflow_name.to_string()))?;

        let execution = Execution::new(definition, input);
        let execution_id = execution.id();
        persist(self.store.as_ref(), &execution.snapshot()).await;
        info!(%execution_id, workflow = workflow_name, "Execution scheduled");

        let store = Arc::clone(&self.store);
        let span = info_span!("execution", %execution_id, workflow = workflow_name);
        let completion = tokio::spawn(execution.run(store).instrument(span));

        Ok(StartedExecution {
            execution_id,
            status: WorkflowStatus::Pending,
            completion,
        })
    }

    pub async fn get(&self, id: ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        self.store.get(id).await
    }

    /// Executions matching `filter`, newest first.
    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionSnapshot>> {
        self.store.list(filter).await
    }

    /// Poll until `id` reaches a terminal status or `timeout` elapses.
    pub async fn wait(
        &self,
        id: ExecutionId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<ExecutionSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self
                .get(id)
                .await?
                .ok_or_else(|| PipelineError::ExecutionNotFound(id.to_string()))?;
            if snapshot.is_terminal() {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PipelineError::WaitTimeout(id.to_string()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Mark executions left unfinished by a previous process as aborted.
    ///
    /// Their running steps become failed and never-started steps skipped.
    /// Call this once at startup, before any execution is started: it cannot
    /// tell a live execution from an orphaned one.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let unfinished = self.store.list_unfinished().await?;
        let now = Utc::now();

        for mut snapshot in unfinished.iter().cloned() {
            for step in &mut snapshot.steps {
                match step.status {
                    StepStatus::Running => {
                        step.status = StepStatus::Failed;
                        step.ended_at = Some(now);
                        step.error
                            .get_or_insert_with(|| "interrupted before completion".to_string());
                    }
                    StepStatus::Pending => step.status = StepStatus::Skipped,
                    _ => {}
                }
            }
            let record = &mut snapshot.execution;
            record.status = WorkflowStatus::Aborted;
            record.ended_at = Some(now);
            record.error = Some("interrupted before completion".to_string());

            warn!(
                execution_id = %record.id,
                workflow = %record.workflow_name,
                "Aborting interrupted execution"
            );
            self.store.put(&snapshot).await?;
        }
        Ok(unfinished.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkflowDefinition;
    use crate::snapshot::{ExecutionRecord, StepId, StepRecord};
    use crate::step::{StepTemplate, step_fn};
    use crate::store::MemoryExecutionStore;
    use serde_json::json;

    fn orchestrator(store: Arc<MemoryExecutionStore>) -> Orchestrator {
        let step = StepTemplate::new(
            "hello",
            step_fn(|_state| async {
                let mut delta = StateBag::new();
                delta.insert("greeting".into(), json!("hi"));
                Ok(delta)
            }),
        );
        let registry = WorkflowRegistry::new()
            .with_workflow(WorkflowDefinition::new("greet", vec![step]).unwrap());
        Orchestrator::new(registry, store)
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_synchronously() {
        let store = Arc::new(MemoryExecutionStore::new());
        let orch = orchestrator(store.clone());
        let err = orch.start("nope", StateBag::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownWorkflow(ref n) if n == "nope"));
        assert!(orch.list(&ExecutionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_returns_pending_then_completes() {
        let store = Arc::new(MemoryExecutionStore::new());
        let orch = orchestrator(store.clone());

        let started = orch.start("greet", StateBag::new()).await.unwrap();
        assert_eq!(started.status, WorkflowStatus::Pending);
        assert_eq!(
            store.history(started.execution_id)[0].status(),
            WorkflowStatus::Pending
        );

        let done = started.completion.await.unwrap();
        assert_eq!(done.status(), WorkflowStatus::Succeeded);

        let fetched = orch.get(started.execution_id).await.unwrap().unwrap();
        assert_eq!(fetched, done);
        assert_eq!(fetched.output_value("greeting"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn test_wait_polls_until_terminal() {
        let store = Arc::new(MemoryExecutionStore::new());
        let orch = orchestrator(store);
        let started = orch.start("greet", StateBag::new()).await.unwrap();

        let snapshot = orch
            .wait(started.execution_id, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(snapshot.status(), WorkflowStatus::Succeeded);

        let missing = orch
            .wait(ExecutionId::new(), Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(missing, PipelineError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_recover_interrupted_aborts_unfinished() {
        let store = Arc::new(MemoryExecutionStore::new());
        let step = |index, status| StepRecord {
            id: StepId::new(),
            index,
            name: format!("s{index}"),
            status,
            attempts: u32::from(status != StepStatus::Pending),
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        };
        let orphan = ExecutionSnapshot {
            execution: ExecutionRecord {
                id: ExecutionId::new(),
                workflow_name: "greet".into(),
                status: WorkflowStatus::Running,
                input: StateBag::new(),
                output: None,
                current_step_index: 1,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                ended_at: None,
                error: None,
            },
            steps: vec![
                step(0, StepStatus::Succeeded),
                step(1, StepStatus::Running),
                step(2, StepStatus::Pending),
            ],
        };
        store.put(&orphan).await.unwrap();

        let orch = orchestrator(store.clone());
        assert_eq!(orch.recover_interrupted().await.unwrap(), 1);

        let recovered = orch.get(orphan.id()).await.unwrap().unwrap();
        assert_eq!(recovered.status(), WorkflowStatus::Aborted);
        assert!(recovered.execution.ended_at.is_some());
        assert_eq!(recovered.steps[0].status, StepStatus::Succeeded);
        assert_eq!(recovered.steps[1].status, StepStatus::Failed);
        assert_eq!(recovered.steps[2].status, StepStatus::Skipped);

        assert_eq!(orch.recover_interrupted().await.unwrap(), 0);
    }
}
