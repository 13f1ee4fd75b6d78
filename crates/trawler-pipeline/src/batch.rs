//! Bounded fan-out of independent tasks.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error};

/// Anything the batch runner can report on by id.
pub trait BatchTask: Send + 'static {
    /// Id carried into the task's outcome, since outcomes arrive unordered.
    fn task_id(&self) -> String;
}

/// Result of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome<R> {
    pub task_id: String,
    pub result: std::result::Result<R, String>,
}

impl<R> TaskOutcome<R> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().err().map(String::as_str)
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `future` as its own tokio task so a panic surfaces as a [`JoinError`].
///
/// Dropping the returned future aborts the task, so nothing outlives its caller.
pub(crate) async fn spawn_contained<F>(future: F) -> std::result::Result<F::Output, JoinError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(future));
    (&mut task.0).await
}

/// Run `f` over every task with at most `limit` invocations in flight.
///
/// A failing or panicking task is captured in its own outcome and never
/// cancels its siblings. Returns only after every task has finished, one
/// outcome per task, in completion order. A `limit` of 0 is treated as 1.
///
/// Dropping the returned future cancels every task still queued or running.
pub async fn run_all<T, R, E, F, Fut>(tasks: Vec<T>, limit: usize, f: F) -> Vec<TaskOutcome<R>>
where
    T: BatchTask,
    R: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    let limit = limit.max(1);
    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(limit));
    let f = Arc::new(f);
    let mut join_set = JoinSet::new();

    debug!(total, limit, "Starting batch");

    for task in tasks {
        let task_id = task.task_id();
        let semaphore = Arc::clone(&semaphore);
        let f = Arc::clone(&f);

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return TaskOutcome {
                    task_id,
                    result: Err("batch semaphore closed".to_string()),
                };
            };
            let result = match spawn_contained(f(task)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(join_err) if join_err.is_panic() => Err(format!("task panicked: {join_err}")),
                Err(join_err) => Err(format!("task cancelled: {join_err}")),
            };
            TaskOutcome { task_id, result }
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "Batch worker failed to join"),
        }
    }
    debug!(
        total,
        succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
        "Batch finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Job(usize);

    impl BatchTask for Job {
        fn task_id(&self) -> String {
            format!("job-{}", self.0)
        }
    }

    fn jobs(n: usize) -> Vec<Job> {
        (0..n).map(Job).collect()
    }

    #[tokio::test]
    async fn test_all_tasks_return_outcomes() {
        let outcomes = run_all(jobs(10), 3, |job: Job| async move {
            if job.0 % 3 == 0 {
                Err(format!("job {} failed", job.0))
            } else {
                Ok(job.0 * 2)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 10);
        let ids: HashSet<_> = outcomes.iter().map(|o| o.task_id.clone()).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 6);
        let failed = outcomes.iter().find(|o| o.task_id == "job-3").unwrap();
        assert_eq!(failed.error(), Some("job 3 failed"));
    }

    #[tokio::test]
    async fn test_limit_one_is_sequential() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let outcomes = {
            let order = Arc::clone(&order);
            run_all(jobs(5), 1, move |job: Job| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(job.0);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, String>(job.0)
                }
            })
            .await
        };

        assert_eq!(outcomes.len(), 5);
        let mut seen = order.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        for (n, limit) in [(20, 4), (4, 4), (7, 1), (3, 8)] {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let outcomes = {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                run_all(jobs(n), limit, move |job: Job| {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(job.0)
                    }
                })
                .await
            };
            assert_eq!(outcomes.len(), n);
            assert!(peak.load(Ordering::SeqCst) <= limit);
            assert!(peak.load(Ordering::SeqCst) >= 1);
        }
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let outcomes = run_all(jobs(3), 2, |job: Job| async move {
            if job.0 == 1 {
                panic!("kaboom");
            }
            Ok::<_, String>(job.0)
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        let panicked = outcomes.iter().find(|o| o.task_id == "job-1").unwrap();
        assert!(panicked.error().unwrap().contains("panicked"));
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_batch_stops_its_tasks() {
        let finished = Arc::new(AtomicUsize::new(0));
        let batch = {
            let finished = Arc::clone(&finished);
            run_all(jobs(4), 4, move |job: Job| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(job.0)
                }
            })
        };

        let timed_out = tokio::time::timeout(Duration::from_millis(50), batch).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    async fn explode() -> u8 {
        panic!("contained")
    }

    #[tokio::test]
    async fn test_spawn_contained_reports_panic() {
        let joined = spawn_contained(explode()).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(spawn_contained(async { 7u8 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_zero_limit_and_empty_batch() {
        let outcomes = run_all(jobs(2), 0, |job: Job| async move { Ok::<_, String>(job.0) }).await;
        assert_eq!(outcomes.len(), 2);

        let empty = run_all(Vec::<Job>::new(), 4, |job: Job| async move { Ok::<_, String>(job.0) })
            .await;
        assert!(empty.is_empty());
    }
}
