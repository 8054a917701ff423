/// Derives the well-known topic names for a consumer group.
///
/// Application topics are user-chosen and carried separately; this only
/// covers the names the push layer itself owns.
#[derive(Debug, Clone)]
pub struct TopicNames {
    group_id: String,
}

impl TopicNames {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
        }
    }

    /// The per-consumer-group retry topic onto which messages are
    /// republished for later re-consumption.
    pub fn retry_topic(&self) -> String {
        format!("%RETRY%{}", self.group_id)
    }

    /// The per-consumer-group dead-letter topic for messages that exceeded
    /// `MAX_RECONSUME_COUNT` retries.
    pub fn dead_letter_topic(&self) -> String {
        format!("%DLQ%{}", self.group_id)
    }

    /// The process-wide topic for a given delay level. Shared across all
    /// consumer groups: content is keyed by a header pointing back at the
    /// retry/real topic, not by the topic name.
    pub fn delay_topic(level: u8) -> String {
        format!("%DELAY%LEVEL{}", level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_retry_and_dlq_topics() {
        let topics = TopicNames::new("orders-group");
        assert_eq!(topics.retry_topic(), "%RETRY%orders-group");
        assert_eq!(topics.dead_letter_topic(), "%DLQ%orders-group");
    }

    #[test]
    fn delay_topic_is_process_wide() {
        assert_eq!(TopicNames::delay_topic(3), "%DELAY%LEVEL3");
    }
}
