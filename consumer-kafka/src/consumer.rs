use std::collections::HashMap;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use consumer_common::{apply_reserved_headers, Broker, BrokerError, Message, PartitionId};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::Message as _;

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::context::KafkaContext;
use crate::error::map_err;

/// `Broker` implementation backed by `rdkafka::consumer::BaseConsumer`.
///
/// `BaseConsumer` is a thin, synchronous wrapper around the underlying C
/// client and is not `Send`-safe to call concurrently; callers must only
/// ever reach this from the single dedicated poll-loop task, matching the
/// `Broker` trait's own contract.
pub struct RdKafkaBroker {
    consumer: BaseConsumer<KafkaContext>,
}

impl RdKafkaBroker {
    pub fn new(
        kafka_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        context: KafkaContext,
    ) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false");

        if kafka_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        let consumer: BaseConsumer<KafkaContext> = client_config
            .create_with_context(context)
            .map_err(|e| map_err("create consumer", e))?;

        Ok(Self { consumer })
    }

    fn to_topic_partition_list(partitions: &[PartitionId]) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        for p in partitions {
            list.add_partition(&p.topic, p.partition);
        }
        list
    }

    fn parse_message(message: &BorrowedMessage<'_>) -> Message {
        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();
        let key = message.key().map(|k| k.to_vec());
        let value = message.payload().unwrap_or_default().to_vec();
        let store_timestamp = message
            .timestamp()
            .to_millis()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .unwrap_or_else(Utc::now);

        let mut headers = HashMap::new();
        if let Some(raw_headers) = message.headers() {
            for idx in 0..raw_headers.count() {
                let header = raw_headers.get(idx);
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        let mut parsed = Message {
            topic,
            partition,
            offset,
            key,
            value,
            store_timestamp,
            headers,
            retry_count: 0,
            delay_level: 0,
            real_topic: None,
            real_partition: None,
            real_offset: None,
            real_store_time: None,
            forward_to: None,
        };
        apply_reserved_headers(&mut parsed);
        parsed
    }
}

impl Broker for RdKafkaBroker {
    fn poll(&self, timeout: Duration) -> Result<Vec<Message>, BrokerError> {
        match self.consumer.poll(timeout) {
            None => Ok(Vec::new()),
            Some(Ok(message)) => Ok(vec![Self::parse_message(&message)]),
            Some(Err(e)) => Err(map_err("poll", e)),
        }
    }

    fn pause(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        let list = Self::to_topic_partition_list(partitions);
        self.consumer
            .pause(&list)
            .map_err(|e| map_err("pause", e))
    }

    fn resume(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        let list = Self::to_topic_partition_list(partitions);
        self.consumer
            .resume(&list)
            .map_err(|e| map_err("resume", e))
    }

    fn paused(&self) -> Result<Vec<PartitionId>, BrokerError> {
        let paused = self.consumer.paused().map_err(|e| map_err("paused", e))?;
        Ok(paused
            .elements()
            .iter()
            .map(|e| PartitionId::new(e.topic(), e.partition()))
            .collect())
    }

    fn assignment(&self) -> Result<Vec<PartitionId>, BrokerError> {
        let assignment = self
            .consumer
            .assignment()
            .map_err(|e| map_err("assignment", e))?;
        Ok(assignment
            .elements()
            .iter()
            .map(|e| PartitionId::new(e.topic(), e.partition()))
            .collect())
    }

    fn seek(&self, partition: &PartitionId, offset: i64) -> Result<(), BrokerError> {
        self.consumer
            .seek(
                &partition.topic,
                partition.partition,
                Offset::Offset(offset),
                Duration::from_secs(5),
            )
            .map_err(|e| map_err("seek", e))
    }

    fn seek_to_beginning(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        for p in partitions {
            self.consumer
                .seek(&p.topic, p.partition, Offset::Beginning, Duration::from_secs(5))
                .map_err(|e| map_err("seek_to_beginning", e))?;
        }
        Ok(())
    }

    fn seek_to_end(&self, partitions: &[PartitionId]) -> Result<(), BrokerError> {
        for p in partitions {
            self.consumer
                .seek(&p.topic, p.partition, Offset::End, Duration::from_secs(5))
                .map_err(|e| map_err("seek_to_end", e))?;
        }
        Ok(())
    }

    fn committed(
        &self,
        partitions: &[PartitionId],
    ) -> Result<HashMap<PartitionId, i64>, BrokerError> {
        let requested = Self::to_topic_partition_list(partitions);
        let committed = self
            .consumer
            .committed_offsets(requested, Duration::from_secs(10))
            .map_err(|e| map_err("committed", e))?;

        let mut result = HashMap::new();
        for element in committed.elements() {
            if let Offset::Offset(offset) = element.offset() {
                result.insert(PartitionId::new(element.topic(), element.partition()), offset);
            }
        }
        Ok(result)
    }

    fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        let mut list = TopicPartitionList::new();
        for (partition, offset) in offsets {
            list.add_partition_offset(&partition.topic, partition.partition, Offset::Offset(*offset))
                .map_err(|e| map_err("commit_sync", e))?;
        }
        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| map_err("commit_sync", e))
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&names)
            .map_err(|e| map_err("subscribe", e))
    }

    fn unsubscribe(&self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

