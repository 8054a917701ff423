use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use consumer_common::{Message, PartitionId};
use tracing::warn;

struct Inner {
    capacity: usize,
    /// Every message currently buffered, in broker order. Entries are only
    /// ever removed from the front, once absorbed into the watermark.
    pending: VecDeque<Message>,
    acknowledged: HashSet<i64>,
    /// How many messages from the front of `pending` have already been
    /// handed out by `drain_ready` at least once.
    drained_count: usize,
    /// Whether a drained chunk is currently out with a handler. Only one
    /// chunk may be in flight per partition at a time.
    in_flight: bool,
    watermark: Option<i64>,
    last_committed: Option<i64>,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: VecDeque::new(),
            acknowledged: HashSet::new(),
            drained_count: 0,
            in_flight: false,
            watermark: None,
            last_committed: None,
        }
    }

    fn store(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.pending.extend(messages);
    }

    fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity
    }

    fn below_resume_threshold(&self) -> bool {
        self.pending.len() < self.capacity / 2
    }

    fn drain_ready(&mut self, batch_size: usize) -> Vec<Message> {
        if self.in_flight || self.drained_count >= self.pending.len() {
            return Vec::new();
        }
        let available = self.pending.len() - self.drained_count;
        let take = available.min(batch_size);
        let chunk: Vec<Message> = self
            .pending
            .iter()
            .skip(self.drained_count)
            .take(take)
            .cloned()
            .collect();
        if chunk.is_empty() {
            return chunk;
        }
        self.drained_count += chunk.len();
        self.in_flight = true;
        chunk
    }

    fn release(&mut self) {
        self.in_flight = false;
    }

    fn ack(&mut self, offsets: &[i64]) {
        for offset in offsets {
            self.acknowledged.insert(*offset);
        }
        loop {
            let Some(front) = self.pending.front() else {
                break;
            };
            if !self.acknowledged.remove(&front.offset) {
                break;
            }
            self.watermark = Some(front.offset);
            self.pending.pop_front();
            self.drained_count = self.drained_count.saturating_sub(1);
        }
    }

    fn take_commit(&mut self) -> Option<i64> {
        match self.watermark {
            Some(watermark) if self.last_committed != Some(watermark) => {
                self.last_committed = Some(watermark);
                Some(watermark + 1)
            }
            _ => None,
        }
    }
}

/// Per-partition in-flight message buffer and offset-acknowledgment
/// tracker. One `Inner` per partition behind its own `Mutex`, so stores
/// into partition A never contend with acks or drains on partition B.
pub struct PartitionBuffer {
    capacity: usize,
    partitions: RwLock<HashMap<PartitionId, Mutex<Inner>>>,
    /// Partitions explicitly revoked but not yet reassigned. Messages that
    /// arrive for a tombstoned partition are dropped: the narrow race
    /// between a rebalance revoke and a poll already in flight for the
    /// same partition.
    tombstoned: Mutex<HashSet<PartitionId>>,
}

impl PartitionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            partitions: RwLock::new(HashMap::new()),
            tombstoned: Mutex::new(HashSet::new()),
        }
    }

    fn with_partition<R>(&self, partition: &PartitionId, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let partitions = self.partitions.read().expect("partition buffer lock poisoned");
        partitions.get(partition).map(|inner| {
            let mut inner = inner.lock().expect("partition inner lock poisoned");
            f(&mut inner)
        })
    }

    /// Store a batch of messages, grouped by partition, preserving broker
    /// order. Returns the set of partitions now at or above capacity.
    pub fn store(&self, messages: Vec<Message>) -> HashSet<PartitionId> {
        let mut grouped: HashMap<PartitionId, Vec<Message>> = HashMap::new();
        for message in messages {
            grouped.entry(message.partition_id()).or_default().push(message);
        }

        let mut full = HashSet::new();
        for (partition, batch) in grouped {
            if self.tombstoned.lock().expect("tombstone lock poisoned").contains(&partition) {
                warn!(partition = %partition, dropped = batch.len(), "dropping messages for revoked partition");
                continue;
            }

            {
                let mut partitions = self.partitions.write().expect("partition buffer lock poisoned");
                partitions.entry(partition.clone()).or_insert_with(|| Mutex::new(Inner::new(self.capacity)));
            }

            let is_full = self
                .with_partition(&partition, |inner| {
                    inner.store(batch);
                    inner.is_full()
                })
                .unwrap_or(false);
            if is_full {
                full.insert(partition);
            }
        }
        full
    }

    pub fn drain_ready(&self, partition: &PartitionId, batch_size: usize) -> Vec<Message> {
        self.with_partition(partition, |inner| inner.drain_ready(batch_size))
            .unwrap_or_default()
    }

    /// Release the claim on the in-flight chunk so the next `drain_ready`
    /// call can proceed, regardless of whether every offset in the chunk
    /// was acked.
    pub fn release(&self, partition: &PartitionId) {
        self.with_partition(partition, Inner::release);
    }

    pub fn ack(&self, partition: &PartitionId, offsets: &[i64]) {
        let acked = self.with_partition(partition, |inner| {
            inner.ack(offsets);
            true
        });
        if acked.is_none() {
            warn!(partition = %partition, ?offsets, "ack for unknown partition, ignoring");
        }
    }

    pub fn take_commit(&self, partition: &PartitionId) -> Option<i64> {
        self.with_partition(partition, Inner::take_commit).flatten()
    }

    pub fn pending_len(&self, partition: &PartitionId) -> usize {
        self.with_partition(partition, |inner| inner.pending.len()).unwrap_or(0)
    }

    pub fn below_resume_threshold(&self, partition: &PartitionId) -> bool {
        self.with_partition(partition, Inner::below_resume_threshold).unwrap_or(true)
    }

    /// Discard all buffered state for a partition: used on seek and on
    /// rebalance revoke.
    pub fn reset(&self, partition: &PartitionId) {
        let mut partitions = self.partitions.write().expect("partition buffer lock poisoned");
        partitions.remove(partition);
        self.tombstoned.lock().expect("tombstone lock poisoned").insert(partition.clone());
    }

    pub fn reset_all(&self) {
        let mut partitions = self.partitions.write().expect("partition buffer lock poisoned");
        let mut tombstoned = self.tombstoned.lock().expect("tombstone lock poisoned");
        for partition in partitions.keys() {
            tombstoned.insert(partition.clone());
        }
        partitions.clear();
    }

    /// Clear the revoked tombstone for partitions just (re)assigned, so
    /// `store` resumes lazily creating buffers for them.
    pub fn on_assigned(&self, partitions: &[PartitionId]) {
        let mut tombstoned = self.tombstoned.lock().expect("tombstone lock poisoned");
        for partition in partitions {
            tombstoned.remove(partition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(topic: &str, partition: i32, offset: i64) -> Message {
        Message {
            topic: topic.to_string(),
            partition,
            offset,
            key: None,
            value: offset.to_string().into_bytes(),
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
    fn happy_path_acks_advance_watermark_to_commit() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        let batch: Vec<Message> = (100..110).map(|o| message("orders", 0, o)).collect();
        buffer.store(batch);

        let drained = buffer.drain_ready(&partition, 10);
        assert_eq!(drained.len(), 10);

        let offsets: Vec<i64> = drained.iter().map(|m| m.offset).collect();
        buffer.ack(&partition, &offsets);
        buffer.release(&partition);

        assert_eq!(buffer.take_commit(&partition), Some(110));
        assert_eq!(buffer.pending_len(&partition), 0);
    }

    #[test]
    fn partial_batch_acks_out_of_order_still_monotone_watermark() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        let batch: Vec<Message> = (100..110).map(|o| message("orders", 0, o)).collect();
        buffer.store(batch);
        buffer.drain_ready(&partition, 10);

        // Ack 100..105, leave 105..110 pending.
        buffer.ack(&partition, &[100, 101, 102, 103, 104]);
        assert_eq!(buffer.take_commit(&partition), Some(105));
        assert_eq!(buffer.pending_len(&partition), 5);

        // Acking out of order (109 before 105..108) does not advance the
        // watermark past the first unacked offset.
        buffer.ack(&partition, &[109]);
        assert_eq!(buffer.take_commit(&partition), None);

        buffer.ack(&partition, &[105, 106, 107, 108]);
        assert_eq!(buffer.take_commit(&partition), Some(110));
        assert_eq!(buffer.pending_len(&partition), 0);
    }

    #[test]
    fn publish_failure_leaves_watermark_stalled() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        let batch: Vec<Message> = (100..110).map(|o| message("orders", 0, o)).collect();
        buffer.store(batch);
        buffer.drain_ready(&partition, 10);

        buffer.ack(&partition, &[100, 101, 102, 103, 104]);
        buffer.release(&partition);
        // 105..109 never acked: simulating publish failure that leaves them
        // outstanding pending local retry.
        assert_eq!(buffer.take_commit(&partition), Some(105));
        assert_eq!(buffer.pending_len(&partition), 5);

        let next_commit = buffer.take_commit(&partition);
        assert_eq!(next_commit, None, "watermark must not advance again until a new ack");
    }

    #[test]
    fn only_one_chunk_in_flight_per_partition() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        buffer.store((0..20).map(|o| message("orders", 0, o)).collect());

        let first = buffer.drain_ready(&partition, 10);
        assert_eq!(first.len(), 10);

        let second = buffer.drain_ready(&partition, 10);
        assert!(second.is_empty(), "a second chunk must not be claimable while one is in flight");

        buffer.release(&partition);
        let second = buffer.drain_ready(&partition, 10);
        assert_eq!(second.len(), 10);
    }

    #[test]
    fn backpressure_pause_then_resume_threshold() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);

        let full = buffer.store((0..100).map(|o| message("orders", 0, o)).collect());
        assert!(full.contains(&partition));
        assert!(!buffer.below_resume_threshold(&partition));

        for start in (0..80).step_by(10) {
            let drained = buffer.drain_ready(&partition, 10);
            let offsets: Vec<i64> = drained.iter().map(|m| m.offset).collect();
            assert_eq!(offsets[0], start);
            buffer.ack(&partition, &offsets);
            buffer.release(&partition);
        }

        assert!(buffer.below_resume_threshold(&partition));
    }

    #[test]
    fn messages_for_revoked_partition_are_dropped() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        buffer.store(vec![message("orders", 0, 1)]);
        buffer.reset(&partition);

        buffer.store(vec![message("orders", 0, 2)]);
        assert_eq!(buffer.pending_len(&partition), 0);

        buffer.on_assigned(&[partition.clone()]);
        buffer.store(vec![message("orders", 0, 3)]);
        assert_eq!(buffer.pending_len(&partition), 1);
    }

    #[test]
    fn rebalance_revoke_commits_then_resets() {
        let buffer = PartitionBuffer::new(50);
        let partition = PartitionId::new("orders", 0);
        buffer.store((105..121).map(|o| message("orders", 0, o)).collect());
        buffer.drain_ready(&partition, 16);
        buffer.ack(&partition, &(105..111).collect::<Vec<_>>());

        assert_eq!(buffer.take_commit(&partition), Some(111));

        buffer.reset(&partition);
        assert_eq!(buffer.pending_len(&partition), 0);
        assert_eq!(buffer.take_commit(&partition), None);
    }
}
