//! Steps: named units of work with their own retry loop.
//!
//! A [`StepTemplate`] is the reusable definition held by a workflow; each
//! execution instantiates its own [`Step`] from it, so step state is never
//! shared across executions.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::spawn_contained;
use crate::policy::{CatchPolicy, RetryPolicy};
use crate::snapshot::{StepId, StepRecord, StepStatus};
use crate::state::StateBag;
use crate::{PipelineError, Result};

/// Type alias for the async function that performs a step's work.
///
/// Takes an owned copy of the state bag and returns the delta to merge back.
pub type StepFn =
    Arc<dyn Fn(StateBag) -> Pin<Box<dyn Future<Output = Result<StateBag>> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`StepFn`].
pub fn step_fn<F, Fut>(f: F) -> StepFn
where
    F: Fn(StateBag) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateBag>> + Send + 'static,
{
    Arc::new(move |state| Box::pin(f(state)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Template
// ─────────────────────────────────────────────────────────────────────────────

/// Definition of a step inside a workflow.
#[derive(Clone)]
pub struct StepTemplate {
    name: String,
    work: StepFn,
    retry: RetryPolicy,
    catch: Option<CatchPolicy>,
    attempt_timeout: Option<Duration>,
}

impl StepTemplate {
    /// Create a step that runs once and fails the execution on error.
    pub fn new(name: impl Into<String>, work: StepFn) -> Self {
        Self {
            name: name.into(),
            work,
            retry: RetryPolicy::no_retry(),
            catch: None,
            attempt_timeout: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Absorb the final failure under `catch.error_key()` instead of failing.
    pub fn with_catch(mut self, catch: CatchPolicy) -> Self {
        self.catch = Some(catch);
        self
    }

    /// Fail any single attempt that runs longer than `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn catch_policy(&self) -> Option<&CatchPolicy> {
        self.catch.as_ref()
    }

    /// Create a fresh, pending step for one execution.
    pub(crate) fn instantiate(&self, index: usize) -> Step {
        Step {
            record: StepRecord {
                id: StepId::new(),
                index,
                name: self.name.clone(),
                status: StepStatus::Pending,
                attempts: 0,
                started_at: None,
                ended_at: None,
                result: None,
                error: None,
            },
            work: self.work.clone(),
            retry: self.retry,
            catch: self.catch.clone(),
            attempt_timeout: self.attempt_timeout,
        }
    }
}

impl fmt::Debug for StepTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepTemplate")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("catch", &self.catch)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step instance
// ─────────────────────────────────────────────────────────────────────────────

/// Receives every status change of a running step.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn step_changed(&self, step: &Step);
}

/// What a finished step hands back to its execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The work function succeeded with this delta.
    Completed(StateBag),
    /// The step failed, but its catch policy turned the error into this delta.
    Absorbed { delta: StateBag, error: String },
    /// The step failed with no catch policy.
    Failed(String),
}

/// One step of one execution.
pub struct Step {
    record: StepRecord,
    work: StepFn,
    retry: RetryPolicy,
    catch: Option<CatchPolicy>,
    attempt_timeout: Option<Duration>,
}

impl Step {
    pub fn record(&self) -> &StepRecord {
        &self.record
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn status(&self) -> StepStatus {
        self.record.status
    }

    pub fn attempts(&self) -> u32 {
        self.record.attempts
    }

    /// Run the attempt loop against `state`.
    ///
    /// Every status change is reported to `observer` before the loop moves on.
    pub async fn execute(&mut self, state: &StateBag, observer: &dyn StepObserver) -> StepOutcome {
        self.transition(StepStatus::Running);
        self.record.attempts = 0;
        self.record.started_at = Some(Utc::now());
        observer.step_changed(self).await;

        let max_attempts = self.retry.max_attempts();
        loop {
            self.record.attempts += 1;
            let attempt = self.record.attempts;
            debug!(step = %self.record.name, attempt, max_attempts, "Running step attempt");

            match self.attempt(state.clone()).await {
                Ok(delta) => {
                    self.record.result = Some(Value::Object(delta.clone()));
                    self.finish(StepStatus::Succeeded);
                    observer.step_changed(self).await;
                    info!(step = %self.record.name, attempts = attempt, "Step succeeded");
                    return StepOutcome::Completed(delta);
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        step = %self.record.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.record.error = Some(message.clone());
                    return self.fail(message, observer).await;
                }
            }
        }
    }

    /// One call of the work function. A panic or timeout is a failed attempt.
    async fn attempt(&self, state: StateBag) -> Result<StateBag> {
        let work = spawn_contained((self.work)(state));
        let joined = match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(joined) => joined,
                Err(_) => return Err(PipelineError::AttemptTimeout(limit)),
            },
            None => work.await,
        };
        match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(PipelineError::step(format!("work panicked: {join_err}")))
            }
            Err(join_err) => Err(PipelineError::step(format!("work cancelled: {join_err}"))),
        }
    }

    async fn fail(&mut self, message: String, observer: &dyn StepObserver) -> StepOutcome {
        match self.catch.clone() {
            Some(catch) => {
                let mut delta = StateBag::new();
                delta.insert(catch.error_key().to_string(), Value::String(message.clone()));
                self.record.result = Some(Value::Object(delta.clone()));
                self.finish(StepStatus::Failed);
                observer.step_changed(self).await;
                warn!(
                    step = %self.record.name,
                    attempts = self.record.attempts,
                    error_key = catch.error_key(),
                    error = %message,
                    "Step failed, error absorbed"
                );
                StepOutcome::Absorbed {
                    delta,
                    error: message,
                }
            }
            None => {
                self.finish(StepStatus::Failed);
                observer.step_changed(self).await;
                warn!(
                    step = %self.record.name,
                    attempts = self.record.attempts,
                    error = %message,
                    "Step failed"
                );
                StepOutcome::Failed(message)
            }
        }
    }

    fn finish(&mut self, status: StepStatus) {
        self.transition(status);
        self.record.ended_at = Some(Utc::now());
    }

    /// Mark a step that never started as skipped.
    pub(crate) fn skip(&mut self) -> bool {
        if self.record.status == StepStatus::Pending {
            self.transition(StepStatus::Skipped);
            true
        } else {
            false
        }
    }

    fn transition(&mut self, next: StepStatus) {
        if !self.record.status.can_transition_to(next) {
            tracing::error!(
                step = %self.record.name,
                from = %self.record.status,
                to = %next,
                "Illegal step status transition"
            );
            return;
        }
        self.record.status = next;
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("record", &self.record)
            .field("retry", &self.retry)
            .field("catch", &self.catch)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records the status sequence it observes.
    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<StepStatus>>,
    }

    #[async_trait]
    impl StepObserver for Recorder {
        async fn step_changed(&self, step: &Step) {
            self.statuses.lock().push(step.status());
        }
    }

    fn counting_fn(calls: Arc<AtomicU32>, succeed_on: Option<u32>) -> StepFn {
        step_fn(move |_state| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                match succeed_on {
                    Some(k) if n >= k => {
                        let mut delta = StateBag::new();
                        delta.insert("calls".into(), json!(n));
                        Ok(delta)
                    }
                    _ => Err(PipelineError::step(format!("boom {n}"))),
                }
            }
        })
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, 0.0, 1.0).unwrap()
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepTemplate::new("ok", counting_fn(calls.clone(), Some(1)))
            .with_retry_policy(policy(3))
            .instantiate(0);
        let recorder = Recorder::default();

        let outcome = step.execute(&StateBag::new(), &recorder).await;
        assert!(matches!(outcome, StepOutcome::Completed(ref d) if d["calls"] == json!(1)));
        assert_eq!(step.attempts(), 1);
        assert_eq!(step.status(), StepStatus::Succeeded);
        assert!(step.record().started_at.is_some());
        assert!(step.record().ended_at.is_some());
        assert_eq!(
            *recorder.statuses.lock(),
            vec![StepStatus::Running, StepStatus::Succeeded]
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_runs_exactly_max_attempts() {
        for max in 1..=4 {
            let calls = Arc::new(AtomicU32::new(0));
            let mut step = StepTemplate::new("bad", counting_fn(calls.clone(), None))
                .with_retry_policy(policy(max))
                .instantiate(0);

            let outcome = step.execute(&StateBag::new(), &Recorder::default()).await;
            assert_eq!(outcome, StepOutcome::Failed(format!("Step failed: boom {max}")));
            assert_eq!(calls.load(Ordering::SeqCst), max);
            assert_eq!(step.attempts(), max);
            assert_eq!(step.status(), StepStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepTemplate::new("flaky", counting_fn(calls.clone(), Some(3)))
            .with_retry_policy(policy(3))
            .instantiate(0);

        let outcome = step.execute(&StateBag::new(), &Recorder::default()).await;
        assert!(matches!(outcome, StepOutcome::Completed(_)));
        assert_eq!(step.attempts(), 3);
    }

    #[tokio::test]
    async fn test_catch_absorbs_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepTemplate::new("caught", counting_fn(calls, None))
            .with_retry_policy(policy(2))
            .with_catch(CatchPolicy::from_path("$.crawlError"))
            .instantiate(0);

        let outcome = step.execute(&StateBag::new(), &Recorder::default()).await;
        match outcome {
            StepOutcome::Absorbed { delta, error } => {
                assert_eq!(delta["crawlError"], json!("Step failed: boom 2"));
                assert_eq!(error, "Step failed: boom 2");
            }
            other => panic!("expected absorbed outcome, got {other:?}"),
        }
        assert_eq!(step.status(), StepStatus::Failed);
        assert_eq!(step.record().error.as_deref(), Some("Step failed: boom 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let start = tokio::time::Instant::now();
        let work = {
            let stamps = stamps.clone();
            step_fn(move |_state| {
                let stamps = stamps.clone();
                async move {
                    stamps.lock().push(start.elapsed());
                    Err(PipelineError::step("always"))
                }
            })
        };
        let mut step = StepTemplate::new("backoff", work)
            .with_retry_policy(RetryPolicy::new(4, 1.0, 2.0).unwrap())
            .instantiate(0);

        step.execute(&StateBag::new(), &Recorder::default()).await;

        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 4);
        assert_eq!(stamps[0], Duration::ZERO);
        assert_eq!(stamps[1] - stamps[0], Duration::from_secs(1));
        assert_eq!(stamps[2] - stamps[1], Duration::from_secs(2));
        assert_eq!(stamps[3] - stamps[2], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let work = step_fn(|_state| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StateBag::new())
        });
        let mut step = StepTemplate::new("slow", work)
            .with_retry_policy(policy(2))
            .with_attempt_timeout(Some(Duration::from_secs(1)))
            .instantiate(0);

        let outcome = step.execute(&StateBag::new(), &Recorder::default()).await;
        assert!(matches!(outcome, StepOutcome::Failed(ref m) if m.contains("timed out")));
        assert_eq!(step.attempts(), 2);
    }

    fn panicking_fn(calls: Arc<AtomicU32>) -> StepFn {
        step_fn(move |_state| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if calls.load(Ordering::SeqCst) > 0 {
                    panic!("work blew up");
                }
                Ok(StateBag::new())
            }
        })
    }

    #[tokio::test]
    async fn test_panicking_work_is_a_failed_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepTemplate::new("panics", panicking_fn(calls.clone()))
            .with_retry_policy(policy(3))
            .instantiate(0);
        let recorder = Recorder::default();

        let outcome = step.execute(&StateBag::new(), &recorder).await;
        assert!(matches!(outcome, StepOutcome::Failed(ref m) if m.contains("panicked")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(step.status(), StepStatus::Failed);
        assert_eq!(
            *recorder.statuses.lock(),
            vec![StepStatus::Running, StepStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_panicking_work_can_be_caught() {
        let mut step = StepTemplate::new("panics", panicking_fn(Arc::new(AtomicU32::new(0))))
            .with_catch(CatchPolicy::from_path("$.notifyError"))
            .instantiate(0);

        let outcome = step.execute(&StateBag::new(), &Recorder::default()).await;
        match outcome {
            StepOutcome::Absorbed { delta, .. } => {
                assert!(delta["notifyError"].as_str().unwrap().contains("panicked"));
            }
            other => panic!("expected absorbed outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut step = StepTemplate::new("s", counting_fn(Arc::new(AtomicU32::new(0)), None))
            .instantiate(2);
        assert_eq!(step.record().index, 2);
        assert!(step.skip());
        assert_eq!(step.status(), StepStatus::Skipped);
        assert!(!step.skip());
    }
}
