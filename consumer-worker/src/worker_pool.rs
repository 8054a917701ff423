use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::error::QueueFullError;
use crate::task_request::TaskRequest;

/// Bounds how many `TaskRequest`s may run at once, and how many more may
/// queue up behind them. Stands in for spec's bounded FIFO worker pool: a
/// `Semaphore` caps concurrent handler invocations, a bounded `mpsc` channel
/// caps how much work can queue up waiting for a permit.
pub struct WorkerPool {
    sender: mpsc::Sender<TaskRequest>,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(consume_thread_num: usize, consume_queue_size: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<TaskRequest>(consume_queue_size);
        let semaphore = Arc::new(Semaphore::new(consume_thread_num));

        let dispatch_semaphore = semaphore.clone();
        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let permit = dispatch_semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore closed");
                tokio::spawn(async move {
                    task.run().await;
                    drop(permit);
                });
            }
        });

        Self {
            sender,
            max_concurrent: consume_thread_num,
            semaphore,
        }
    }

    /// Enqueue a task for execution. Never blocks: a full queue is reported
    /// as `QueueFullError` rather than waited out, so the dispatcher can
    /// route the rejection through the retry scheduler instead of stalling
    /// its partition loop.
    pub fn submit(&self, task: TaskRequest) -> Result<(), QueueFullError> {
        metrics::gauge!("consumer_worker_pool_saturation_percent").set(
            1f64 - self.semaphore.available_permits() as f64 / self.max_concurrent as f64,
        );
        self.sender.try_send(task).map_err(|error| {
            if matches!(error, mpsc::error::TrySendError::Closed(_)) {
                warn!("worker pool dispatch loop has shut down");
            }
            QueueFullError
        })
    }
}
