//! `rdkafka`-backed `Broker`/`Producer` implementation, plus the Kafka
//! client configuration and context glue needed to build one.

pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod producer;

pub use config::{ConsumerConfig, KafkaConfig};
pub use consumer::RdKafkaBroker;
pub use context::KafkaContext;
pub use producer::RdKafkaProducer;
