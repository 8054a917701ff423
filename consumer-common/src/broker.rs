use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{Message, PartitionId};

/// Broker-client failures are reduced to this single shape so
/// `consumer-worker` never needs to know which concrete client produced
/// them; the concrete client (e.g. `consumer-kafka`) is responsible for
/// mapping its own error types into this one.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },
}

impl BrokerError {
    pub fn op(operation: &'static str, message: impl std::fmt::Display) -> Self {
        BrokerError::Operation {
            operation,
            message: message.to_string(),
        }
    }
}

/// The broker primitives the poll loop needs. Deliberately synchronous:
/// the underlying client (e.g. `rdkafka::consumer::BaseConsumer`) is not
/// thread-safe and these calls block, so they are only ever invoked from
/// the single dedicated poll-loop task -- never called concurrently with
/// each other.
///
/// This trait, and `Producer` below, are the "external collaborator"
/// boundary: this crate only depends on the interface, not on any one
/// broker implementation.
pub trait Broker: Send + Sync {
    /// Fetch whatever is immediately available up to `timeout`. May return
    /// an empty `Vec` if nothing arrived before the timeout elapsed.
    fn poll(&self, timeout: Duration) -> Result<Vec<Message>, BrokerError>;

    fn pause(&self, partitions: &[PartitionId]) -> Result<(), BrokerError>;
    fn resume(&self, partitions: &[PartitionId]) -> Result<(), BrokerError>;
    fn paused(&self) -> Result<Vec<PartitionId>, BrokerError>;
    fn assignment(&self) -> Result<Vec<PartitionId>, BrokerError>;

    fn seek(&self, partition: &PartitionId, offset: i64) -> Result<(), BrokerError>;
    fn seek_to_beginning(&self, partitions: &[PartitionId]) -> Result<(), BrokerError>;
    fn seek_to_end(&self, partitions: &[PartitionId]) -> Result<(), BrokerError>;

    /// Committed offset per partition, if the broker has one (used on
    /// assignment, when trusting broker-side committed offsets in
    /// CLUSTERING mode).
    fn committed(&self, partitions: &[PartitionId]) -> Result<HashMap<PartitionId, i64>, BrokerError>;

    fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError>;

    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;
    fn unsubscribe(&self) -> Result<(), BrokerError>;
}

/// A message to be published, prior to having an assigned partition/offset.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordMetadata {
    pub partition: i32,
    pub offset: i64,
}

/// Thread-safe, shared producer used to republish retries and dead-letter
/// messages. Unlike `Broker`, this is safe to call concurrently from many
/// `TaskRequest` invocations at once.
#[async_trait]
pub trait Producer: Send + Sync + 'static {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_record_builder_sets_headers() {
        let record = OutboundRecord::new("orders", b"payload".to_vec())
            .with_header("x-retry-topic", "orders");
        assert_eq!(record.headers.get("x-retry-topic").unwrap(), "orders");
    }

    #[test]
    fn broker_error_formats_operation_and_message() {
        let err = BrokerError::op("commit", "timed out");
        assert_eq!(err.to_string(), "commit failed: timed out");
    }
}
