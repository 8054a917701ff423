use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use consumer_common::PartitionId;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::ConsumeContext;
use crate::partition_buffer::PartitionBuffer;
use crate::retry_scheduler::RetryScheduler;
use crate::task_request::TaskRequest;
use crate::worker_pool::WorkerPool;

/// One `tokio` task per assigned partition, continuously draining whatever
/// `PartitionBuffer::drain_ready` hands back and submitting it to the
/// `WorkerPool`. Fairness across partitions falls out of giving each its
/// own task rather than sharing a single scanning loop: no partition's
/// dispatch cadence depends on another's.
pub struct Dispatcher {
    buffer: Arc<PartitionBuffer>,
    worker_pool: Arc<WorkerPool>,
    retry_scheduler: RetryScheduler,
    task_ctx: Arc<ConsumeContext>,
    batch_size: usize,
    idle_backoff: Duration,
    queue_full_backoff: Duration,
    running: Arc<AtomicBool>,
    handles: Mutex<HashMap<PartitionId, JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        buffer: Arc<PartitionBuffer>,
        worker_pool: Arc<WorkerPool>,
        retry_scheduler: RetryScheduler,
        task_ctx: Arc<ConsumeContext>,
        batch_size: usize,
        idle_backoff: Duration,
        queue_full_backoff: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            buffer,
            worker_pool,
            retry_scheduler,
            task_ctx,
            batch_size,
            idle_backoff,
            queue_full_backoff,
            running,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a drain loop for every partition not already being served.
    /// Called on initial assignment and on every rebalance-assigned event.
    pub fn assign(&self, partitions: &[PartitionId]) {
        let mut handles = self.handles.lock().expect("dispatcher handles lock poisoned");
        for partition in partitions {
            if handles.contains_key(partition) {
                continue;
            }
            info!(%partition, "dispatcher starting drain loop");
            handles.insert(partition.clone(), self.spawn_partition_loop(partition.clone()));
        }
    }

    /// Abort the drain loop for each revoked partition. Any `TaskRequest`
    /// already running for it is left to finish; its eventual ack becomes a
    /// no-op once `OffsetPersistor` has reset the buffer for that partition.
    pub fn revoke(&self, partitions: &[PartitionId]) {
        let mut handles = self.handles.lock().expect("dispatcher handles lock poisoned");
        for partition in partitions {
            if let Some(handle) = handles.remove(partition) {
                handle.abort();
                info!(%partition, "dispatcher stopped drain loop");
            }
        }
    }

    fn spawn_partition_loop(&self, partition: PartitionId) -> JoinHandle<()> {
        let buffer = self.buffer.clone();
        let worker_pool = self.worker_pool.clone();
        let retry_scheduler = self.retry_scheduler.clone();
        let task_ctx = self.task_ctx.clone();
        let batch_size = self.batch_size;
        let idle_backoff = self.idle_backoff;
        let queue_full_backoff = self.queue_full_backoff;
        let running = self.running.clone();

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let chunk = buffer.drain_ready(&partition, batch_size);
                if chunk.is_empty() {
                    tokio::time::sleep(idle_backoff).await;
                    continue;
                }

                let task = TaskRequest::new(chunk, partition.clone(), task_ctx.clone(), true);
                if let Err(_queue_full) = worker_pool.submit(task.clone()) {
                    warn!(%partition, "worker pool queue full, routing through retry scheduler");
                    retry_scheduler.schedule(task, queue_full_backoff);
                }
            }
        })
    }
}
