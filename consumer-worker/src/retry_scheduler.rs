use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::task_request::TaskRequest;
use crate::worker_pool::WorkerPool;

/// Fixed backoff used when re-dispatching a locally-retried batch (a
/// message whose publish to its delay topic failed, or that a
/// `BROADCASTING` consumer cannot forward at all). Spec.md calls for a
/// fixed 5-second wait here, distinct from the delay-level ladder.
pub const LOCAL_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Resubmits a `TaskRequest` to the `WorkerPool` after a backoff, retrying
/// forever on rejection rather than dropping the task. A `tokio::time::sleep`
/// loop stands in for spec's "sleep delay and recurse" -- recursion would
/// grow the task's stack unboundedly under sustained backpressure, so this
/// loops instead.
#[derive(Clone)]
pub struct RetryScheduler {
    worker_pool: Arc<WorkerPool>,
}

impl RetryScheduler {
    pub fn new(worker_pool: Arc<WorkerPool>) -> Self {
        Self { worker_pool }
    }

    /// Spawn a task that waits `delay`, then submits `task` to the worker
    /// pool, retrying with the same `delay` for as long as the pool reports
    /// its queue full.
    pub fn schedule(&self, task: TaskRequest, delay: Duration) {
        let worker_pool = self.worker_pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            loop {
                match worker_pool.submit(task.clone()) {
                    Ok(()) => break,
                    Err(_queue_full) => {
                        warn!("retry scheduler resubmission rejected, backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }
}
