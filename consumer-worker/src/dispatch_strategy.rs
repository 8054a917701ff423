use std::time::Duration;

use async_trait::async_trait;
use consumer_common::{
    build_dead_letter_headers, build_retry_headers, next_delay_level, ConsumeModel, Message,
    OutboundRecord, Producer, TopicNames,
};
use tracing::warn;

use crate::poll_loop::PollLoopHandle;

/// What to do with one message that came back `RETRY_LATER` and was not
/// flagged successful by the handler.
pub enum RetryOutcome {
    /// Ack the offset now (published to delay/DLQ topic, or dropped).
    AckNow,
    /// Leave the offset unacked; the caller schedules a local retry.
    LocalRetry,
}

/// Parameterizes `TaskRequest`'s post-processing of a single unacked
/// message, so the ordinal variant is modeled as a post-processor strategy
/// rather than a parallel inheritance hierarchy.
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    async fn handle_retry(
        &self,
        producer: &dyn Producer,
        topic_names: &TopicNames,
        consume_model: ConsumeModel,
        max_reconsume_count: u32,
        message: &mut Message,
        delay_override: Option<u8>,
    ) -> RetryOutcome;
}

/// The fully-specified variant: messages not yet at `MAX_RECONSUME_COUNT`
/// are republished through the delay-topic ladder (CLUSTERING) or left for
/// local retry (BROADCASTING); exhausted messages go to the DLQ.
pub struct Concurrent;

#[async_trait]
impl DispatchStrategy for Concurrent {
    async fn handle_retry(
        &self,
        producer: &dyn Producer,
        topic_names: &TopicNames,
        consume_model: ConsumeModel,
        max_reconsume_count: u32,
        message: &mut Message,
        delay_override: Option<u8>,
    ) -> RetryOutcome {
        if message.retry_count < max_reconsume_count {
            match consume_model {
                ConsumeModel::Clustering => {
                    let delay_level = next_delay_level(message.retry_count, delay_override);
                    let next_retry_count = message.retry_count + 1;
                    let headers = build_retry_headers(
                        message,
                        next_retry_count,
                        delay_level,
                        &topic_names.retry_topic(),
                    );
                    let record = OutboundRecord {
                        topic: TopicNames::delay_topic(delay_level),
                        key: message.key.clone(),
                        value: message.value.clone(),
                        headers,
                    };
                    match producer.send(record).await {
                        Ok(_) => {
                            message.stamp_real();
                            message.retry_count = next_retry_count;
                            message.delay_level = delay_level;
                            RetryOutcome::AckNow
                        }
                        Err(error) => {
                            warn!(%error, id = %message.id(), "publish to delay topic failed, scheduling local retry");
                            RetryOutcome::LocalRetry
                        }
                    }
                }
                ConsumeModel::Broadcasting => RetryOutcome::LocalRetry,
            }
        } else {
            match consume_model {
                ConsumeModel::Clustering => {
                    let headers = build_dead_letter_headers(message);
                    let record = OutboundRecord {
                        topic: topic_names.dead_letter_topic(),
                        key: message.key.clone(),
                        value: message.value.clone(),
                        headers,
                    };
                    if let Err(error) = producer.send(record).await {
                        warn!(%error, id = %message.id(), "publish to dead letter topic failed, dropping message anyway");
                    }
                }
                ConsumeModel::Broadcasting => {
                    warn!(id = %message.id(), "dropping message after exhausting retries in broadcasting mode");
                }
            }
            RetryOutcome::AckNow
        }
    }
}

/// Trivial specialization: no delay-topic hop. Retries
/// suspend the poll loop for a fixed window rather than publishing
/// anywhere, approximating "re-enter the head of the partition buffer" --
/// the partition buffer has no head-reinsertion primitive, so the message
/// is instead left unacked and handed back through the same local-retry
/// path `Concurrent`'s `BROADCASTING` branch uses.
pub struct Ordinal {
    pub poll_loop: PollLoopHandle,
    pub suspend_for: Duration,
}

#[async_trait]
impl DispatchStrategy for Ordinal {
    async fn handle_retry(
        &self,
        _producer: &dyn Producer,
        _topic_names: &TopicNames,
        _consume_model: ConsumeModel,
        _max_reconsume_count: u32,
        _message: &mut Message,
        _delay_override: Option<u8>,
    ) -> RetryOutcome {
        self.poll_loop.suspend();
        tokio::time::sleep(self.suspend_for).await;
        self.poll_loop.resume();
        RetryOutcome::LocalRetry
    }
}
