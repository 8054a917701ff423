use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    #[envconfig(default = "3000")]
    pub kafka_publish_deadline_ms: u64,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    /// We always disable librdkafka's own offset auto-commit: commits are
    /// driven exclusively by `OffsetPersistor`, which only commits offsets
    /// the partition buffer has proven are safe.
    #[envconfig(default = "200")]
    pub kafka_poll_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_config_has_sane_defaults() {
        std::env::remove_var("KAFKA_HOSTS");
        let config = KafkaConfig::init_from_env().unwrap();
        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert!(!config.kafka_tls);
    }
}
