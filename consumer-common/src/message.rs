use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Identifies a partition of a topic. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionId {
    pub topic: String,
    pub partition: i32,
}

impl PartitionId {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A single message as delivered by the broker, plus the retry-ladder
/// bookkeeping properties the push layer stamps onto it.
///
/// Invariant: on a message read from a retry topic, `real_topic` /
/// `real_partition` / `real_offset` / `real_store_time` always reflect the
/// message's *original* placement, regardless of how many times it has been
/// retried. They are stamped once, on the first retry, and never
/// overwritten afterwards.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub store_timestamp: DateTime<Utc>,
    pub headers: HashMap<String, String>,

    /// Number of times this message has been retried. 0 for a message
    /// consumed from an application topic for the first time.
    pub retry_count: u32,
    /// The delay level this message was last (or will next be) published
    /// at, 0 if it has never entered the retry ladder.
    pub delay_level: u8,

    pub real_topic: Option<String>,
    pub real_partition: Option<i32>,
    pub real_offset: Option<i64>,
    pub real_store_time: Option<DateTime<Utc>>,

    /// Set only on messages polled from a delay-level topic: the topic
    /// `DelayTopicForwarder` should republish to once the delay elapses.
    pub forward_to: Option<String>,
}

impl Message {
    pub fn partition_id(&self) -> PartitionId {
        PartitionId::new(self.topic.clone(), self.partition)
    }

    /// A stable identifier for logs and metric labels.
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.topic, self.partition, self.offset)
    }

    /// True once this message has been stamped with its original placement,
    /// i.e. it has gone through at least one retry-topic hop.
    pub fn is_stamped(&self) -> bool {
        self.real_topic.is_some()
    }

    /// Stamp the real-* properties from this message's current placement.
    /// A no-op if already stamped, preserving the "stamped exactly once"
    /// invariant regardless of how many times `stamp_real` is called.
    pub fn stamp_real(&mut self) {
        if self.is_stamped() {
            return;
        }
        self.real_topic = Some(self.topic.clone());
        self.real_partition = Some(self.partition);
        self.real_offset = Some(self.offset);
        self.real_store_time = Some(self.store_timestamp);
    }

    /// Restore a retried message's original topic/partition from its
    /// stamped `real-*` properties, so the handler sees the message as if
    /// it came from its original placement rather than the retry topic.
    /// A no-op for messages that were never retried.
    pub fn rehydrate(&mut self) {
        if let (Some(topic), Some(partition)) = (self.real_topic.clone(), self.real_partition) {
            self.topic = topic;
            self.partition = partition;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            topic: "%RETRY%group-a".to_string(),
            partition: 3,
            offset: 42,
            key: None,
            value: b"payload".to_vec(),
            store_timestamp: Utc::now(),
            headers: HashMap::new(),
            retry_count: 1,
            delay_level: 2,
            real_topic: Some("orders".to_string()),
            real_partition: Some(0),
            real_offset: Some(105),
            real_store_time: Some(Utc::now()),
            forward_to: None,
        }
    }

    #[test]
    fn rehydrate_restores_original_placement() {
        let mut msg = sample();
        msg.rehydrate();
        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.partition, 0);
    }

    #[test]
    fn stamp_real_is_idempotent() {
        let mut msg = Message {
            real_topic: None,
            real_partition: None,
            real_offset: None,
            real_store_time: None,
            ..sample()
        };
        msg.topic = "orders".to_string();
        msg.partition = 0;
        msg.offset = 105;

        msg.stamp_real();
        let first_stamp = msg.real_store_time;

        msg.topic = "%RETRY%group-a".to_string();
        msg.partition = 3;
        msg.offset = 999;
        msg.stamp_real();

        assert_eq!(msg.real_topic.as_deref(), Some("orders"));
        assert_eq!(msg.real_partition, Some(0));
        assert_eq!(msg.real_offset, Some(105));
        assert_eq!(msg.real_store_time, first_stamp);
    }
}
