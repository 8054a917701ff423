use std::time::Duration;

use async_trait::async_trait;
use consumer_common::{BrokerError, OutboundRecord, Producer, RecordMetadata};
use rdkafka::config::ClientConfig;
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::debug;

use crate::config::KafkaConfig;
use crate::context::KafkaContext;
use crate::error::map_err;

/// `Producer` implementation backed by `rdkafka::producer::FutureProducer`.
/// Safe to clone and share across the worker pool: delivery is driven by
/// librdkafka's own background thread, so callers only await the result.
#[derive(Clone)]
pub struct RdKafkaProducer {
    producer: FutureProducer<KafkaContext>,
    publish_deadline: Duration,
}

impl RdKafkaProducer {
    pub fn new(config: &KafkaConfig, context: KafkaContext) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set("message.timeout.ms", config.kafka_message_timeout_ms.to_string())
            .set("compression.codec", config.kafka_compression_codec.clone())
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        debug!(?client_config, "creating rdkafka producer");
        let producer: FutureProducer<KafkaContext> = client_config
            .create_with_context(context)
            .map_err(|e| map_err("create producer", e))?;

        Ok(Self {
            producer,
            publish_deadline: Duration::from_millis(config.kafka_publish_deadline_ms),
        })
    }
}

#[async_trait]
impl Producer for RdKafkaProducer {
    async fn send(&self, record: OutboundRecord) -> Result<RecordMetadata, BrokerError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(rdkafka::message::Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            });
        }

        let mut future_record = FutureRecord::to(&record.topic)
            .payload(&record.value)
            .headers(headers);
        if let Some(key) = &record.key {
            future_record = future_record.key(key);
        }

        let result = self
            .producer
            .send(future_record, Timeout::After(self.publish_deadline))
            .await;

        match result {
            Ok((partition, offset)) => Ok(RecordMetadata { partition, offset }),
            Err((error, _owned_message)) => Err(map_err("send", error)),
        }
    }
}
