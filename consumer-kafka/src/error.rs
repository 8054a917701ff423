use consumer_common::BrokerError;
use rdkafka::error::KafkaError;

pub fn map_err(operation: &'static str, error: KafkaError) -> BrokerError {
    BrokerError::op(operation, error)
}
