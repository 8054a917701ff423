use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use consumer_common::{Broker, MessageFilter, PartitionId};
use health::HealthHandle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::partition_buffer::PartitionBuffer;

/// Operations that must run on the poll loop's own thread, since the
/// underlying broker client is not thread-safe. A bounded command channel
/// lets seek/subscribe/commit become messages sent to the loop instead of
/// contending for a shared lock.
pub enum PollCommand {
    Subscribe(Vec<String>),
    Unsubscribe,
    Seek { partition: PartitionId, offset: i64 },
    SeekToBeginning(Vec<PartitionId>),
    SeekToEnd(Vec<PartitionId>),
    /// Commit the given per-partition offsets. Used by `OffsetPersistor`'s
    /// periodic flush, which otherwise has no safe way to reach the broker
    /// from its own background task.
    Commit(HashMap<PartitionId, i64>),
}

/// A cheaply-cloneable handle for sending commands into the poll loop from
/// other tasks (OffsetPersistor's periodic flush and rebalance callbacks,
/// the public `subscribe`/`seek*` API).
#[derive(Clone)]
pub struct PollLoopHandle {
    commands: mpsc::Sender<PollCommand>,
    suspended: Arc<AtomicBool>,
}

impl PollLoopHandle {
    pub async fn send(&self, command: PollCommand) {
        if self.commands.send(command).await.is_err() {
            warn!("poll loop command channel closed, loop has shut down");
        }
    }

    /// Enqueue a command without awaiting: for use from synchronous call
    /// sites (the broker's own rebalance callback, which runs synchronously
    /// inside `Broker::poll` and cannot await) and as a non-blocking
    /// fire-and-forget from async periodic tasks. Drops the command with a
    /// warning if the channel is full or the loop has shut down, same as
    /// every other command this channel carries.
    pub fn send_sync(&self, command: PollCommand) {
        if let Err(error) = self.commands.try_send(command) {
            warn!(%error, "poll loop command channel full or closed, dropping command");
        }
    }

    /// Flip the loop into a no-poll wait. Idempotent.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }
}

pub struct PollLoop {
    broker: Arc<dyn Broker>,
    buffer: Arc<PartitionBuffer>,
    filter: Arc<dyn MessageFilter>,
    poll_timeout: Duration,
    liveness: Option<HealthHandle>,
    commands: mpsc::Receiver<PollCommand>,
    suspended: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl PollLoop {
    pub fn new(
        broker: Arc<dyn Broker>,
        buffer: Arc<PartitionBuffer>,
        filter: Arc<dyn MessageFilter>,
        poll_timeout: Duration,
        liveness: Option<HealthHandle>,
        running: Arc<AtomicBool>,
    ) -> (Self, PollLoopHandle) {
        let (tx, rx) = mpsc::channel(32);
        let suspended = Arc::new(AtomicBool::new(false));
        let handle = PollLoopHandle {
            commands: tx,
            suspended: suspended.clone(),
        };
        let poll_loop = Self {
            broker,
            buffer,
            filter,
            poll_timeout,
            liveness,
            commands: rx,
            suspended,
            running,
        };
        (poll_loop, handle)
    }

    /// Run the poll loop to completion (until `running` is cleared) on a
    /// dedicated blocking thread, since `Broker::poll` blocks.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            while self.running.load(Ordering::SeqCst) {
                self.drain_commands();

                if let Some(liveness) = &self.liveness {
                    liveness.report_healthy_blocking();
                }

                if self.suspended.load(Ordering::SeqCst) {
                    std::thread::sleep(self.poll_timeout);
                    continue;
                }

                self.tick();
            }
        })
    }

    /// Apply any pending seek/subscribe commands before polling. Never
    /// blocks: uses `try_recv` so a quiet command channel doesn't stall
    /// message delivery.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let result = match command {
                PollCommand::Subscribe(topics) => self.broker.subscribe(&topics),
                PollCommand::Unsubscribe => self.broker.unsubscribe(),
                PollCommand::Seek { partition, offset } => self.broker.seek(&partition, offset),
                PollCommand::SeekToBeginning(partitions) => {
                    self.broker.seek_to_beginning(&partitions)
                }
                PollCommand::SeekToEnd(partitions) => self.broker.seek_to_end(&partitions),
                PollCommand::Commit(offsets) => self.broker.commit_sync(&offsets),
            };
            if let Err(error) = result {
                error!(%error, "poll loop command failed");
            }
        }
    }

    fn tick(&mut self) {
        let messages = match self.broker.poll(self.poll_timeout) {
            Ok(messages) => messages,
            Err(error) => {
                error!(%error, "broker poll failed, continuing");
                return;
            }
        };
        if messages.is_empty() {
            return;
        }

        let surviving: Vec<_> = messages
            .into_iter()
            .filter(|m| self.filter.is_permit_all() || self.filter.can_deliver_message(&m.value, &m.headers))
            .collect();
        if surviving.is_empty() {
            return;
        }

        debug!(count = surviving.len(), "polled messages");
        let need_pause = self.buffer.store(surviving);
        self.reconcile_pause_state(need_pause);
    }

    fn reconcile_pause_state(&self, need_pause: std::collections::HashSet<PartitionId>) {
        let assigned = match self.broker.assignment() {
            Ok(assigned) => assigned,
            Err(error) => {
                error!(%error, "failed to read broker assignment");
                return;
            }
        };
        let currently_paused = match self.broker.paused() {
            Ok(paused) => paused,
            Err(error) => {
                error!(%error, "failed to read broker paused set");
                return;
            }
        };
        let currently_paused: std::collections::HashSet<_> = currently_paused.into_iter().collect();

        let mut to_pause = Vec::new();
        let mut to_resume = Vec::new();
        for partition in &assigned {
            let is_paused = currently_paused.contains(partition);
            if is_paused {
                if self.buffer.below_resume_threshold(partition) {
                    to_resume.push(partition.clone());
                }
            } else if need_pause.contains(partition) {
                to_pause.push(partition.clone());
            }
        }

        if !to_pause.is_empty() {
            if let Err(error) = self.broker.pause(&to_pause) {
                error!(%error, ?to_pause, "failed to pause partitions");
            }
        }
        if !to_resume.is_empty() {
            if let Err(error) = self.broker.resume(&to_resume) {
                error!(%error, ?to_resume, "failed to resume partitions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consumer_common::mock::MockBroker;
    use consumer_common::{Message, PermitAll};
    use std::collections::HashMap;

    fn message(partition: i32, offset: i64) -> Message {
        Message {
            topic: "orders".to_string(),
            partition,
            offset,
            key: None,
            value: b"v".to_vec(),
            store_timestamp: Utc::now(),
            headers: HashMap::new(),
            retry_count: 0,
            delay_level: 0,
            real_topic: None,
            real_partition: None,
            real_offset: None,
            real_store_time: None,
            forward_to: None,
        }
    }

    #[test]
    fn tick_stores_and_pauses_full_partition() {
        let broker = Arc::new(MockBroker::new());
        let partition = PartitionId::new("orders", 0);
        broker.assign(vec![partition.clone()]);
        for offset in 0..10 {
            broker.push(message(0, offset));
        }

        let buffer = Arc::new(PartitionBuffer::new(5));
        let (mut poll_loop, _handle) = PollLoop::new(
            broker.clone(),
            buffer.clone(),
            Arc::new(PermitAll),
            Duration::from_millis(1),
            None,
            Arc::new(AtomicBool::new(true)),
        );

        for _ in 0..10 {
            poll_loop.tick();
        }

        assert!(broker.paused().unwrap().contains(&partition));
        assert!(buffer.pending_len(&partition) >= 5);
    }

    #[test]
    fn commit_command_is_applied_on_next_drain() {
        let broker = Arc::new(MockBroker::new());
        let partition = PartitionId::new("orders", 0);
        broker.assign(vec![partition.clone()]);

        let buffer = Arc::new(PartitionBuffer::new(5));
        let (mut poll_loop, handle) = PollLoop::new(
            broker.clone(),
            buffer,
            Arc::new(PermitAll),
            Duration::from_millis(1),
            None,
            Arc::new(AtomicBool::new(true)),
        );

        let mut offsets = HashMap::new();
        offsets.insert(partition.clone(), 7);
        handle.send_sync(PollCommand::Commit(offsets));
        poll_loop.drain_commands();

        assert_eq!(broker.committed(&[partition.clone()]).unwrap().get(&partition), Some(&7));
    }

    #[test]
    fn tick_resumes_once_below_hysteresis_threshold() {
        let broker = Arc::new(MockBroker::new());
        let partition = PartitionId::new("orders", 0);
        broker.assign(vec![partition.clone()]);
        broker.pause(&[partition.clone()]).unwrap();

        let buffer = Arc::new(PartitionBuffer::new(10));
        let (poll_loop, _handle) = PollLoop::new(
            broker.clone(),
            buffer.clone(),
            Arc::new(PermitAll),
            Duration::from_millis(1),
            None,
            Arc::new(AtomicBool::new(true)),
        );

        poll_loop.reconcile_pause_state(std::collections::HashSet::new());
        assert!(!broker.paused().unwrap().contains(&partition));
    }
}
