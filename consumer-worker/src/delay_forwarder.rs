use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use consumer_common::{build_carryover_headers, duration_for_level, Broker, OutboundRecord, Producer};
use health::HealthHandle;
use tracing::{error, warn};

/// Consumes a single delay-level topic and republishes each message to its
/// `x-forward-to` target once the level's fixed delay has elapsed. Exists
/// because a generic pull-based broker has no native delay-queue semantics:
/// something has to actually hold the message and wait. One of these runs
/// per delay level, each with its own minimal poll loop -- no partition
/// ordering or backpressure concerns, since delay topics have no handler
/// and no retry ladder of their own.
///
/// `broker` must be an instance this forwarder doesn't share with the
/// main poll loop or any other forwarder: `subscribe` replaces a
/// consumer's whole subscription set, and the broker client isn't safe to
/// poll from more than one task concurrently.
pub struct DelayTopicForwarder {
    level: u8,
    topic: String,
    broker: Arc<dyn Broker>,
    producer: Arc<dyn Producer>,
    poll_timeout: Duration,
    liveness: Option<HealthHandle>,
}

impl DelayTopicForwarder {
    pub fn new(
        level: u8,
        topic: impl Into<String>,
        broker: Arc<dyn Broker>,
        producer: Arc<dyn Producer>,
        poll_timeout: Duration,
        liveness: Option<HealthHandle>,
    ) -> Self {
        Self {
            level,
            topic: topic.into(),
            broker,
            producer,
            poll_timeout,
            liveness,
        }
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(error) = self.broker.subscribe(&[self.topic.clone()]) {
                error!(%error, topic = %self.topic, "delay forwarder failed to subscribe");
                return;
            }
            while running.load(Ordering::SeqCst) {
                if let Some(liveness) = &self.liveness {
                    liveness.report_healthy().await;
                }
                self.tick().await;
            }
        })
    }

    async fn tick(&self) {
        let messages = match self.broker.poll(self.poll_timeout) {
            Ok(messages) => messages,
            Err(error) => {
                error!(%error, topic = %self.topic, "delay forwarder poll failed");
                return;
            }
        };
        for message in messages {
            self.forward_one(message).await;
        }
    }

    async fn forward_one(&self, message: consumer_common::Message) {
        let Some(target) = message.forward_to.clone() else {
            warn!(id = %message.id(), "delay topic message missing x-forward-to, dropping");
            self.commit_past(&message);
            return;
        };

        if let Some(wait) = duration_for_level(self.level) {
            let due_at = message.store_timestamp + chrono::Duration::from_std(wait).unwrap_or_default();
            let remaining = (due_at - Utc::now()).to_std().unwrap_or_default();
            if remaining > Duration::ZERO {
                tokio::time::sleep(remaining).await;
            }
        }

        // `message.headers` has already had `apply_reserved_headers` run on
        // receipt (poll -> parse_message), so it holds only application
        // headers at this point -- the retry-ladder bookkeeping (retry
        // count, delay level, real-*) lives on the typed fields and must be
        // re-encoded here, or the republished message loses it entirely.
        let record = OutboundRecord {
            topic: target,
            key: message.key.clone(),
            value: message.value.clone(),
            headers: build_carryover_headers(&message),
        };
        match self.producer.send(record).await {
            Ok(_) => self.commit_past(&message),
            Err(error) => {
                warn!(%error, id = %message.id(), "delay forwarder republish failed, will redeliver on next poll");
            }
        }
    }

    /// Commit this message's offset only after it has been successfully
    /// forwarded, so a crash mid-wait just redelivers and re-sleeps rather
    /// than dropping it.
    fn commit_past(&self, message: &consumer_common::Message) {
        let mut offsets = HashMap::new();
        offsets.insert(message.partition_id(), message.offset + 1);
        if let Err(error) = self.broker.commit_sync(&offsets) {
            error!(%error, id = %message.id(), "delay forwarder failed to commit offset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consumer_common::mock::{MockBroker, MockProducer};
    use consumer_common::wire::{HDR_FORWARD_TO, HDR_REAL_TOPIC, HDR_RETRY_COUNT};
    use consumer_common::PartitionId;
    use std::collections::HashMap as Map;

    fn message(forward_to: Option<&str>, store_timestamp: chrono::DateTime<Utc>) -> consumer_common::Message {
        let mut headers = Map::new();
        if let Some(target) = forward_to {
            headers.insert(HDR_FORWARD_TO.to_string(), target.to_string());
        }
        let mut msg = consumer_common::Message {
            topic: "%DELAY%LEVEL1".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            value: b"payload".to_vec(),
            store_timestamp,
            headers,
            retry_count: 1,
            delay_level: 1,
            real_topic: Some("orders".to_string()),
            real_partition: Some(0),
            real_offset: Some(42),
            real_store_time: Some(store_timestamp),
            forward_to: None,
        };
        consumer_common::apply_reserved_headers(&mut msg);
        msg
    }

    #[tokio::test]
    async fn forwards_after_delay_elapses_and_commits() {
        let broker = Arc::new(MockBroker::new());
        let partition = PartitionId::new("%DELAY%LEVEL1", 0);
        broker.assign(vec![partition.clone()]);
        broker.push(message(Some("%RETRY%orders-group"), Utc::now() - chrono::Duration::seconds(2)));

        let producer = Arc::new(MockProducer::new());
        let forwarder = DelayTopicForwarder::new(
            1,
            "%DELAY%LEVEL1",
            broker.clone(),
            producer.clone(),
            Duration::from_millis(1),
            None,
        );
        forwarder.tick().await;

        assert_eq!(producer.sent().len(), 1);
        let sent = &producer.sent()[0];
        assert_eq!(sent.topic, "%RETRY%orders-group");
        // The retry-ladder bookkeeping must survive the delay-topic hop:
        // apply_reserved_headers stripped it out of the polled message's
        // header map, so forward_one must re-encode it from the typed
        // fields rather than forwarding the (now-empty) header map as-is.
        assert_eq!(sent.headers.get(HDR_RETRY_COUNT).unwrap(), "1");
        assert_eq!(sent.headers.get(HDR_REAL_TOPIC).unwrap(), "orders");
        assert!(!sent.headers.contains_key(HDR_FORWARD_TO));
        assert_eq!(
            broker.committed(&[partition.clone()]).unwrap().get(&partition),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn missing_forward_to_is_dropped_not_stuck() {
        let broker = Arc::new(MockBroker::new());
        let partition = PartitionId::new("%DELAY%LEVEL1", 0);
        broker.assign(vec![partition.clone()]);
        broker.push(message(None, Utc::now()));

        let producer = Arc::new(MockProducer::new());
        let forwarder = DelayTopicForwarder::new(
            1,
            "%DELAY%LEVEL1",
            broker.clone(),
            producer.clone(),
            Duration::from_millis(1),
            None,
        );
        forwarder.tick().await;

        assert!(producer.sent().is_empty());
        assert_eq!(
            broker.committed(&[partition.clone()]).unwrap().get(&partition),
            Some(&1)
        );
    }
}
