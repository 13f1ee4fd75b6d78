//! Orchestrator behaviour against the SQLite execution store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use trawler_pipeline::{
    CatchPolicy, ExecutionFilter, ExecutionSnapshot, Orchestrator, PipelineError, RetryPolicy,
    SqliteExecutionStore, StateBag, StepStatus, StepTemplate, WorkflowDefinition,
    WorkflowRegistry, WorkflowStatus, step_fn,
};

fn test_store() -> (Arc<SqliteExecutionStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SqliteExecutionStore::open(dir.path().join("executions.db")).unwrap();
    (Arc::new(store), dir)
}

fn write(key: &'static str) -> StepTemplate {
    StepTemplate::new(
        key,
        step_fn(move |state| async move {
            let mut delta = StateBag::new();
            delta.insert(key.to_string(), state.get("tag").cloned().unwrap_or(json!(null)));
            Ok(delta)
        }),
    )
}

fn always_fails(name: &'static str, calls: Arc<AtomicU32>, max_attempts: u32) -> StepTemplate {
    StepTemplate::new(
        name,
        step_fn(move |_state| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<StateBag, _>(PipelineError::step("permanent failure"))
            }
        }),
    )
    .with_retry_policy(RetryPolicy::new(max_attempts, 0.0, 1.0).unwrap())
}

async fn wait(orch: &Orchestrator, started: trawler_pipeline::StartedExecution) -> ExecutionSnapshot {
    orch.wait(
        started.execution_id,
        Duration::from_millis(5),
        Duration::from_secs(10),
    )
    .await
    .unwrap()
}

fn input(tag: &str) -> StateBag {
    let mut state = StateBag::new();
    state.insert("tag".into(), json!(tag));
    state
}

#[tokio::test]
async fn test_uncaught_failure_stops_execution() {
    let (store, _dir) = test_store();
    let calls = Arc::new(AtomicU32::new(0));
    let registry = WorkflowRegistry::new().with_workflow(
        WorkflowDefinition::new(
            "fails",
            vec![write("first"), always_fails("middle", calls.clone(), 4), write("last")],
        )
        .unwrap(),
    );
    let orch = Orchestrator::new(registry, store);

    let started = orch.start("fails", input("x")).await.unwrap();
    let snapshot = wait(&orch, started).await;

    assert_eq!(snapshot.status(), WorkflowStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let middle = snapshot.step("middle").unwrap();
    assert_eq!(middle.status, StepStatus::Failed);
    assert_eq!(middle.attempts, 4);
    assert_eq!(middle.error.as_deref(), Some("Step failed: permanent failure"));
    let last = snapshot.step("last").unwrap();
    assert_eq!(last.status, StepStatus::Skipped);
    assert!(last.started_at.is_none());
    assert_eq!(snapshot.execution.current_step_index, 1);
    assert!(snapshot.execution.ended_at.is_some());
}

#[tokio::test]
async fn test_caught_failure_is_recorded_in_state() {
    let (store, _dir) = test_store();
    let calls = Arc::new(AtomicU32::new(0));
    let registry = WorkflowRegistry::new().with_workflow(
        WorkflowDefinition::new(
            "absorbs",
            vec![
                always_fails("flaky", calls.clone(), 3)
                    .with_catch(CatchPolicy::from_path("$.flakyError")),
                write("after"),
            ],
        )
        .unwrap(),
    );
    let orch = Orchestrator::new(registry, store);

    let started = orch.start("absorbs", input("y")).await.unwrap();
    let snapshot = wait(&orch, started).await;

    assert_eq!(snapshot.status(), WorkflowStatus::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(snapshot.step("flaky").unwrap().status, StepStatus::Failed);
    assert_eq!(
        snapshot.output_value("flakyError"),
        Some(&json!("Step failed: permanent failure"))
    );
    assert_eq!(snapshot.output_value("after"), Some(&json!("y")));
}

#[tokio::test]
async fn test_concurrent_executions_are_isolated() {
    let (store, _dir) = test_store();
    let registry = WorkflowRegistry::new()
        .with_workflow(WorkflowDefinition::new("echo", vec![write("echo")]).unwrap());
    let orch = Orchestrator::new(registry, store);

    let mut started = Vec::new();
    for i in 0..8 {
        let tag = format!("run-{i}");
        started.push((tag.clone(), orch.start("echo", input(&tag)).await.unwrap()));
    }
    for (tag, handle) in started {
        let snapshot = wait(&orch, handle).await;
        assert_eq!(snapshot.status(), WorkflowStatus::Succeeded);
        assert_eq!(snapshot.output_value("echo"), Some(&json!(tag)));
    }

    let all = orch.list(&ExecutionFilter::default()).await.unwrap();
    assert_eq!(all.len(), 8);
    assert!(
        all.windows(2)
            .all(|w| w[0].execution.created_at >= w[1].execution.created_at)
    );
    let succeeded = orch
        .list(&ExecutionFilter::default().with_status(WorkflowStatus::Succeeded).with_limit(3))
        .await
        .unwrap();
    assert_eq!(succeeded.len(), 3);
    let failed = orch
        .list(&ExecutionFilter::default().with_status(WorkflowStatus::Failed))
        .await
        .unwrap();
    assert!(failed.is_empty());
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("executions.db");

    let hang = StepTemplate::new(
        "hang",
        step_fn(|_state| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StateBag::new())
        }),
    );
    let registry = WorkflowRegistry::new()
        .with_workflow(WorkflowDefinition::new("hangs", vec![hang, write("never")]).unwrap());
    let first = Orchestrator::new(
        registry.clone(),
        Arc::new(SqliteExecutionStore::open(&path).unwrap()),
    );
    let started = first.start("hangs", StateBag::new()).await.unwrap();
    let id = started.execution_id;

    // Wait until the hanging step has been persisted as running.
    let mut running = false;
    for _ in 0..200 {
        let snapshot = first.get(id).await.unwrap().unwrap();
        if snapshot.steps[0].status == StepStatus::Running {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(running);
    started.completion.abort();

    // A fresh process opening the same database.
    let second = Orchestrator::new(registry, Arc::new(SqliteExecutionStore::open(&path).unwrap()));
    assert_eq!(second.recover_interrupted().await.unwrap(), 1);

    let recovered = second.get(id).await.unwrap().unwrap();
    assert_eq!(recovered.status(), WorkflowStatus::Aborted);
    assert_eq!(recovered.steps[0].status, StepStatus::Failed);
    assert_eq!(recovered.steps[1].status, StepStatus::Skipped);
    assert!(recovered.execution.error.is_some());
}

#[tokio::test]
async fn test_unknown_workflow() {
    let (store, _dir) = test_store();
    let orch = Orchestrator::new(WorkflowRegistry::new(), store);
    let err = orch.start("mcp-tool-crawler", StateBag::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownWorkflow(_)));
}
