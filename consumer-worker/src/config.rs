use std::str::FromStr;
use std::time;

use consumer_common::ConsumeModel;
use envconfig::Envconfig;

/// The maximum `consume_batch_size` this implementation allows, enforced by
/// [`Config::validate`] rather than merely documented.
pub const MAX_CONSUME_BATCH_SIZE: u32 = 32;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "0.0.0.0")]
    pub bind_host: String,

    #[envconfig(default = "3302")]
    pub bind_port: u16,

    #[envconfig(nested = true)]
    pub kafka: consumer_kafka::KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: consumer_kafka::ConsumerConfig,

    /// Comma-separated application topic names. The retry topic is added
    /// implicitly; the DLQ topic is never subscribed.
    pub consume_topics: NonEmptyString,

    /// Alternative to an explicit topic list: a regular expression over
    /// topic names. Validated locally at startup with `regex` (librdkafka
    /// treats a `^`-prefixed subscription as broker-side regex matching, so
    /// the pattern itself is never evaluated client-side beyond this
    /// validation pass) and takes precedence over `consume_topics` when set.
    pub consume_topic_pattern: Option<String>,

    #[envconfig(default = "CLUSTERING")]
    pub consume_model: EnvConsumeModel,

    #[envconfig(default = "10")]
    pub consume_batch_size: u32,

    #[envconfig(default = "4")]
    pub consume_thread_num: usize,

    #[envconfig(default = "1000")]
    pub consume_queue_size: usize,

    /// `PartitionBuffer` capacity (messages) per partition: the pending
    /// count at which `PollLoop` pauses that partition.
    #[envconfig(default = "500")]
    pub partition_buffer_capacity: usize,

    #[envconfig(default = "200")]
    pub poll_message_await_timeout_ms: EnvMsDuration,

    #[envconfig(default = "60000")]
    pub max_message_deal_time_ms: EnvMsDuration,

    #[envconfig(default = "1000")]
    pub offset_commit_interval_ms: EnvMsDuration,

    /// Only consulted in `BROADCASTING` mode.
    #[envconfig(default = "./consumer-offsets")]
    pub offset_store_dir: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("consume_batch_size {0} exceeds the maximum of {MAX_CONSUME_BATCH_SIZE}")]
    BatchSizeTooLarge(u32),
    #[error("consume_topic_pattern {0:?} is not a valid regular expression: {1}")]
    InvalidTopicPattern(String, regex::Error),
}

impl Config {
    /// The subscription to hand to `Broker::subscribe`. A `consume_topic_pattern`
    /// takes precedence, expressed as librdkafka's `^`-prefixed regex
    /// subscription convention (a single-element list).
    pub fn topics(&self) -> Vec<String> {
        if let Some(pattern) = &self.consume_topic_pattern {
            return vec![format!("^{pattern}")];
        }
        self.consume_topics
            .as_str()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Caps `consume_batch_size` rather than silently truncating it, so a
    /// misconfigured deployment fails fast at startup. Also rejects an
    /// invalid `consume_topic_pattern` before it ever reaches the broker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consume_batch_size > MAX_CONSUME_BATCH_SIZE {
            return Err(ConfigError::BatchSizeTooLarge(self.consume_batch_size));
        }
        if let Some(pattern) = &self.consume_topic_pattern {
            if let Err(error) = regex::Regex::new(pattern) {
                return Err(ConfigError::InvalidTopicPattern(pattern.clone(), error));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvConsumeModel(pub ConsumeModel);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseConsumeModelError(String);

impl FromStr for EnvConsumeModel {
    type Err = ParseConsumeModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CLUSTERING" => Ok(EnvConsumeModel(ConsumeModel::Clustering)),
            "BROADCASTING" => Ok(EnvConsumeModel(ConsumeModel::Broadcasting)),
            other => Err(ParseConsumeModelError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `Envconfig::init_from_env` reads process-wide env vars, so these
    /// cases share one test to avoid racing each other over shared state.
    #[test]
    fn config_parsing() {
        std::env::set_var("CONSUME_TOPICS", "orders, payments ,shipments");
        std::env::set_var("KAFKA_CONSUMER_GROUP", "orders-group");
        std::env::remove_var("CONSUME_BATCH_SIZE");

        let config = Config::init_from_env().unwrap();
        assert_eq!(config.topics(), vec!["orders", "payments", "shipments"]);
        assert!(matches!(config.consume_model.0, ConsumeModel::Clustering));
        assert!(config.validate().is_ok());

        std::env::set_var("CONSUME_BATCH_SIZE", "64");
        let config = Config::init_from_env().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BatchSizeTooLarge(64))
        ));
        std::env::remove_var("CONSUME_BATCH_SIZE");

        std::env::set_var("CONSUME_TOPIC_PATTERN", "orders-.*");
        let config = Config::init_from_env().unwrap();
        assert_eq!(config.topics(), vec!["^orders-.*"]);
        assert!(config.validate().is_ok());

        std::env::set_var("CONSUME_TOPIC_PATTERN", "orders-[");
        let config = Config::init_from_env().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopicPattern(_, _))
        ));
        std::env::remove_var("CONSUME_TOPIC_PATTERN");
    }
}
