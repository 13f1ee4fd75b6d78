//! One run of a workflow: sequential steps over a shared state bag.

use std::iter;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::registry::WorkflowDefinition;
use crate::snapshot::{ExecutionId, ExecutionRecord, ExecutionSnapshot, WorkflowStatus};
use crate::state::{self, StateBag};
use crate::step::{Step, StepObserver, StepOutcome};
use crate::store::ExecutionStore;

/// A workflow instance.
///
/// Owns its steps and state bag exclusively. Every status change, of the
/// execution or of any step, is written to the store as a full snapshot
/// before the next transition happens.
#[derive(Debug)]
pub struct Execution {
    record: ExecutionRecord,
    steps: Vec<Step>,
    state: StateBag,
}

impl Execution {
    /// Build a pending execution with fresh steps from `definition`.
    pub fn new(definition: &WorkflowDefinition, input: StateBag) -> Self {
        let steps = definition
            .steps()
            .iter()
            .enumerate()
            .map(|(index, template)| template.instantiate(index))
            .collect();
        Self {
            record: ExecutionRecord {
                id: ExecutionId::new(),
                workflow_name: definition.name().to_string(),
                status: WorkflowStatus::Pending,
                input: input.clone(),
                output: None,
                current_step_index: 0,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                error: None,
            },
            steps,
            state: input,
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.record.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.record.status
    }

    /// Current snapshot of the execution and all of its steps.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        ExecutionSnapshot {
            execution: self.record.clone(),
            steps: self.steps.iter().map(|s| s.record().clone()).collect(),
        }
    }

    /// Drive the execution to a terminal status and return the final snapshot.
    pub async fn run(mut self, store: Arc<dyn ExecutionStore>) -> ExecutionSnapshot {
        let execution_id = self.record.id;
        info!(%execution_id, workflow = %self.record.workflow_name, "Starting execution");

        self.transition(WorkflowStatus::Running);
        self.record.started_at = Some(Utc::now());
        persist(store.as_ref(), &self.snapshot()).await;

        for index in 0..self.steps.len() {
            self.record.current_step_index = index;

            let (before, rest) = self.steps.split_at_mut(index);
            let Some((step, after)) = rest.split_first_mut() else {
                break;
            };
            let observer = SnapshotObserver {
                record: &self.record,
                before,
                after,
                store: store.as_ref(),
            };
            let outcome = step.execute(&self.state, &observer).await;

            match outcome {
                StepOutcome::Completed(delta) => state::merge(&mut self.state, delta),
                StepOutcome::Absorbed { delta, .. } => state::merge(&mut self.state, delta),
                StepOutcome::Failed(message) => {
                    let step_name = self.steps[index].name().to_string();
                    return self.fail(&step_name, &message, store.as_ref()).await;
                }
            }
        }

        self.transition(WorkflowStatus::Succeeded);
        self.record.ended_at = Some(Utc::now());
        self.record.output = Some(self.state.clone());
        let snapshot = self.snapshot();
        persist(store.as_ref(), &snapshot).await;
        info!(%execution_id, "Execution succeeded");
        snapshot
    }

    /// Skip the steps that never started, then fail the execution.
    ///
    /// The skips are persisted together, before the failure itself.
    async fn fail(
        mut self,
        step_name: &str,
        message: &str,
        store: &dyn ExecutionStore,
    ) -> ExecutionSnapshot {
        let mut skipped = 0;
        for step in &mut self.steps {
            if step.skip() {
                skipped += 1;
            }
        }
        if skipped > 0 {
            persist(store, &self.snapshot()).await;
        }

        self.transition(WorkflowStatus::Failed);
        self.record.ended_at = Some(Utc::now());
        self.record.error = Some(format!("Step '{step_name}' failed: {message}"));
        self.record.output = Some(self.state.clone());
        let snapshot = self.snapshot();
        persist(store, &snapshot).await;
        warn!(
            execution_id = %self.record.id,
            step = step_name,
            skipped,
            error = message,
            "Execution failed"
        );
        snapshot
    }

    fn transition(&mut self, next: WorkflowStatus) {
        if !self.record.status.can_transition_to(next) {
            tracing::error!(
                execution_id = %self.record.id,
                from = %self.record.status,
                to = %next,
                "Illegal execution status transition"
            );
            return;
        }
        self.record.status = next;
    }
}

/// Persists the whole execution whenever the running step changes status.
struct SnapshotObserver<'a> {
    record: &'a ExecutionRecord,
    before: &'a [Step],
    after: &'a [Step],
    store: &'a dyn ExecutionStore,
}

#[async_trait]
impl<'a> StepObserver for SnapshotObserver<'a> {
    async fn step_changed(&self, step: &Step) {
        let steps = self
            .before
            .iter()
            .chain(iter::once(step))
            .chain(self.after.iter())
            .map(|s| s.record().clone())
            .collect();
        let snapshot = ExecutionSnapshot {
            execution: self.record.clone(),
            steps,
        };
        persist(self.store, &snapshot).await;
    }
}

/// Write a snapshot, logging instead of failing when the store is unavailable.
pub(crate) async fn persist(store: &dyn ExecutionStore, snapshot: &ExecutionSnapshot) {
    if let Err(e) = store.put(snapshot).await {
        warn!(
            execution_id = %snapshot.execution.id,
            status = %snapshot.execution.status,
            error = %e,
            "Failed to persist execution snapshot"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CatchPolicy, RetryPolicy};
    use crate::registry::WorkflowDefinition;
    use crate::snapshot::StepStatus;
    use crate::step::{StepTemplate, step_fn};
    use crate::store::MemoryExecutionStore;
    use crate::{PipelineError, Result};
    use serde_json::json;

    fn put(key: &'static str, value: serde_json::Value) -> StepTemplate {
        StepTemplate::new(
            key,
            step_fn(move |_state| {
                let value = value.clone();
                async move {
                    let mut delta = StateBag::new();
                    delta.insert(key.to_string(), value);
                    Ok(delta)
                }
            }),
        )
    }

    fn failing(name: &'static str) -> StepTemplate {
        StepTemplate::new(
            name,
            step_fn(|_state| async { Err::<StateBag, _>(PipelineError::step("nope")) }),
        )
        .with_retry_policy(RetryPolicy::new(2, 0.0, 1.0).unwrap())
    }

    fn definition(steps: Vec<StepTemplate>) -> Result<WorkflowDefinition> {
        WorkflowDefinition::new("test", steps)
    }

    #[tokio::test]
    async fn test_state_flows_between_steps() {
        let reads_a = StepTemplate::new(
            "reads_a",
            step_fn(|state| async move {
                let mut delta = StateBag::new();
                delta.insert("seen_a".into(), state.get("a").cloned().unwrap_or_default());
                Ok(delta)
            }),
        );
        let def = definition(vec![put("a", json!(1)), reads_a]).unwrap();
        let store = Arc::new(MemoryExecutionStore::new());
        let mut input = StateBag::new();
        input.insert("seed".into(), json!(true));

        let snapshot = Execution::new(&def, input).run(store.clone()).await;

        assert_eq!(snapshot.status(), WorkflowStatus::Succeeded);
        let output = snapshot.execution.output.clone().unwrap();
        assert_eq!(output["seed"], json!(true));
        assert_eq!(output["a"], json!(1));
        assert_eq!(output["seen_a"], json!(1));
        assert_eq!(snapshot.execution.current_step_index, 1);
        assert_eq!(store.get(snapshot.id()).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_uncaught_failure_skips_remaining_steps() {
        let def = definition(vec![put("a", json!(1)), failing("bad"), put("c", json!(3))]).unwrap();
        let store = Arc::new(MemoryExecutionStore::new());

        let snapshot = Execution::new(&def, StateBag::new()).run(store).await;

        assert_eq!(snapshot.status(), WorkflowStatus::Failed);
        assert_eq!(snapshot.steps[0].status, StepStatus::Succeeded);
        assert_eq!(snapshot.steps[1].status, StepStatus::Failed);
        assert_eq!(snapshot.steps[1].attempts, 2);
        assert_eq!(snapshot.steps[2].status, StepStatus::Skipped);
        assert!(snapshot.steps[2].started_at.is_none());
        assert!(snapshot.execution.error.as_deref().unwrap().contains("'bad'"));
        assert!(snapshot.output_value("c").is_none());
    }

    #[tokio::test]
    async fn test_caught_failure_continues() {
        let def = definition(vec![
            failing("bad").with_catch(CatchPolicy::from_path("$.badError")),
            put("c", json!(3)),
        ])
        .unwrap();
        let store = Arc::new(MemoryExecutionStore::new());

        let snapshot = Execution::new(&def, StateBag::new()).run(store).await;

        assert_eq!(snapshot.status(), WorkflowStatus::Succeeded);
        assert_eq!(snapshot.steps[0].status, StepStatus::Failed);
        assert_eq!(snapshot.output_value("badError"), Some(&json!("Step failed: nope")));
        assert_eq!(snapshot.output_value("c"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_every_transition_is_persisted_in_order() {
        let def = definition(vec![put("a", json!(1)), put("b", json!(2))]).unwrap();
        let store = Arc::new(MemoryExecutionStore::new());

        let snapshot = Execution::new(&def, StateBag::new()).run(store.clone()).await;

        let history = store.history(snapshot.id());
        // RUNNING, then (running, succeeded) per step, then SUCCEEDED.
        assert_eq!(history.len(), 6);
        assert_eq!(history[0].status(), WorkflowStatus::Running);
        assert_eq!(history[1].steps[0].status, StepStatus::Running);
        assert_eq!(history[2].steps[0].status, StepStatus::Succeeded);
        assert_eq!(history[3].steps[1].status, StepStatus::Running);
        assert_eq!(history[3].execution.current_step_index, 1);
        assert_eq!(history[5].status(), WorkflowStatus::Succeeded);

        let indexes: Vec<_> = history.iter().map(|s| s.execution.current_step_index).collect();
        assert!(indexes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_skips_are_persisted_before_failure() {
        let def = definition(vec![failing("bad"), put("b", json!(2)), put("c", json!(3))]).unwrap();
        let store = Arc::new(MemoryExecutionStore::new());

        let snapshot = Execution::new(&def, StateBag::new()).run(store.clone()).await;

        let history = store.history(snapshot.id());
        // RUNNING, step running, step failed, skips, FAILED.
        assert_eq!(history.len(), 5);
        let skips = &history[3];
        assert_eq!(skips.status(), WorkflowStatus::Running);
        assert_eq!(skips.steps[0].status, StepStatus::Failed);
        assert_eq!(skips.steps[1].status, StepStatus::Skipped);
        assert_eq!(skips.steps[2].status, StepStatus::Skipped);
        assert_eq!(history[4].status(), WorkflowStatus::Failed);
    }
}
