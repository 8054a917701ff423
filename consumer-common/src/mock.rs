//! In-memory `Broker`/`Producer` implementations for exercising the push
//! pipeline without a live cluster. Messages are queued per partition so
//! poll order still respects per-partition ordering and pause/resume still
//! behaves like the real broker; nothing here is async or networked.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{Broker, BrokerError, OutboundRecord, Producer, RecordMetadata};
use crate::message::{Message, PartitionId};

#[derive(Default)]
struct MockBrokerState {
    queues: HashMap<PartitionId, VecDeque<Message>>,
    assignment: Vec<PartitionId>,
    paused: HashSet<PartitionId>,
    committed: HashMap<PartitionId, i64>,
    cursor: usize,
}

/// A `Broker` whose partitions are queues of pre-built `Message`s pushed in
/// by the test itself via [`MockBroker::push`].
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<MockBrokerState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign this broker to the given partitions, as if a rebalance had
    /// just handed them to us.
    pub fn assign(&self, partitions: Vec<PartitionId>) {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        for p in &partitions {
            state.queues.entry(p.clone()).or_default();
        }
        state.assignment = partitions;
        state.cursor = 0;
    }

    /// Enqueue a message onto its own partition's queue.
    pub fn push(&self, message: Message) {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        state
            .queues
            .entry(message.partition_id())
            .or_default()
            .push_back(message);
    }

    pub fn queue_len(&self, partition: &PartitionId) -> usize {
        let state = self.state.lock().expect("mock broker lock poisoned");
        state.queues.get(partition).map_or(0, VecDeque::len)
    }
}

impl Broker for MockBroker {
    fn poll(&self, timeout: Duration) -> Result<Vec<Message>, BrokerError> {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        let assignment = state.assignment.clone();
        if assignment.is_empty() {
            drop(state);
            sleep(timeout);
            return Ok(Vec::new());
        }

        for step in 0..assignment.len() {
            let idx = (state.cursor + step) % assignment.len();
            let partition = assignment[idx].clone();
            if state.paused.contains(&partition) {
                continue;
            }
            if let Some(queue) = state.queues.get_mut(&partition) {
                if let Some(message) = queue.pop_front() {
                    state.cursor = (idx + 1) % assignment.len();
                    return Ok(vec![message]);
                }
            }
        }

        drop(state);
        sleep(timeout);
        Ok(Vec::new())
    }

    fn pause(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        state.paused.extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        for p in partitions {
            state.paused.remove(p);
        }
        Ok(())
    }

    fn paused(&self) -> Result<Vec<PartitionId>, BrokerError> {
        let state = self.state.lock().expect("mock broker lock poisoned");
        Ok(state.paused.iter().cloned().collect())
    }

    fn assignment(&self) -> Result<Vec<PartitionId>, BrokerError> {
        let state = self.state.lock().expect("mock broker lock poisoned");
        Ok(state.assignment.clone())
    }

    fn seek(&self, _partition: &PartitionId, _offset: i64) -> Result<(), BrokerError> {
        Ok(())
    }

    fn seek_to_beginning(&self, _partitions: &[PartitionId]) -> Result<(), BrokerError> {
        Ok(())
    }

    fn seek_to_end(&self, _partitions: &[PartitionId]) -> Result<(), BrokerError> {
        Ok(())
    }

    fn committed(&self, partitions: &[PartitionId]) -> Result<HashMap<PartitionId, i64>, BrokerError> {
        let state = self.state.lock().expect("mock broker lock poisoned");
        Ok(partitions
            .iter()
            .filter_map(|p| state.committed.get(p).map(|offset| (p.clone(), *offset)))
            .collect())
    }

    fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        state.committed.extend(offsets.clone());
        Ok(())
    }

    fn subscribe(&self, _topics: &[String]) -> Result<(), BrokerError> {
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("mock broker lock poisoned");
        state.assignment.clear();
        Ok(())
    }
}

#[derive(Default)]
struct MockProducerState {
    sent: Vec<OutboundRecord>,
    failing_topics: HashSet<String>,
    next_offset: HashMap<String, i64>,
}

/// A `Producer` that records everything sent to it instead of publishing
/// anywhere. Individual topics can be made to fail on demand, to exercise
/// the publish-failure paths (local-retry fallback, DLQ-publish failure).
#[derive(Default)]
pub struct MockProducer {
    state: Mutex<MockProducerState>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.state
            .lock()
            .expect("mock producer lock poisoned")
            .failing_topics
            .insert(topic.into());
    }

    pub fn unfail_topic(&self, topic: &str) {
        self.state
            .lock()
            .expect("mock producer lock poisoned")
            .failing_topics
            .remove(topic);
    }

    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.state.lock().expect("mock producer lock poisoned").sent.clone()
    }
}

#[async_trait]
impl Producer for MockProducer {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        let mut state = self.state.lock().expect("mock producer lock poisoned");
        if state.failing_topics.contains(&record.topic) {
            return Err(BrokerError::op("send", format!("mock producer configured to fail topic {}", record.topic)));
        }

        let offset = state.next_offset.entry(record.topic.clone()).or_insert(0);
        let assigned = *offset;
        *offset += 1;
        state.sent.push(record);
        Ok(RecordMetadata {
            partition: 0,
            offset: assigned,
        })
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
    fn poll_respects_per_partition_fifo_order() {
        let broker = MockBroker::new();
        let p0 = PartitionId::new("orders", 0);
        broker.assign(vec![p0.clone()]);
        broker.push(message("orders", 0, 1));
        broker.push(message("orders", 0, 2));

        let first = broker.poll(Duration::from_millis(1)).unwrap();
        let second = broker.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(first[0].offset, 1);
        assert_eq!(second[0].offset, 2);
    }

    #[test]
    fn paused_partition_is_skipped() {
        let broker = MockBroker::new();
        let p0 = PartitionId::new("orders", 0);
        broker.assign(vec![p0.clone()]);
        broker.push(message("orders", 0, 1));
        broker.pause(&[p0.clone()]).unwrap();

        let polled = broker.poll(Duration::from_millis(1)).unwrap();
        assert!(polled.is_empty());

        broker.resume(&[p0]).unwrap();
        let polled = broker.poll(Duration::from_millis(1)).unwrap();
        assert_eq!(polled[0].offset, 1);
    }

    #[test]
    fn commit_sync_then_committed_round_trips() {
        let broker = MockBroker::new();
        let p0 = PartitionId::new("orders", 0);
        let mut offsets = HashMap::new();
        offsets.insert(p0.clone(), 42);
        broker.commit_sync(&offsets).unwrap();

        let committed = broker.committed(&[p0.clone()]).unwrap();
        assert_eq!(committed.get(&p0), Some(&42));
    }

    #[tokio::test]
    async fn producer_records_sent_and_can_be_made_to_fail() {
        let producer = MockProducer::new();
        let record = OutboundRecord::new("orders", b"payload".to_vec());

        producer.send(record.clone()).await.unwrap();
        assert_eq!(producer.sent().len(), 1);

        producer.fail_topic("orders");
        let result = producer.send(record).await;
        assert!(result.is_err());
    }
}
