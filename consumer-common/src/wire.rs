//! Header names used to carry the retry-ladder bookkeeping properties on
//! the wire. Every `Broker` implementation is expected to expose these as
//! regular message headers and populate `Message`'s retry fields from them
//! on receipt; `consumer-worker` uses the encode side when republishing to
//! a retry, delay, or dead-letter topic.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::message::Message;

pub const HDR_RETRY_COUNT: &str = "x-retry-count";
pub const HDR_DELAY_LEVEL: &str = "x-delay-level";
pub const HDR_REAL_TOPIC: &str = "x-real-topic";
pub const HDR_REAL_PARTITION: &str = "x-real-partition";
pub const HDR_REAL_OFFSET: &str = "x-real-offset";
pub const HDR_REAL_STORE_TIME: &str = "x-real-store-time";
/// Points a delay-level topic message back at the topic it should be
/// republished to once its delay elapses (the retry topic, in practice).
pub const HDR_FORWARD_TO: &str = "x-forward-to";

const RESERVED_HEADERS: &[&str] = &[
    HDR_RETRY_COUNT,
    HDR_DELAY_LEVEL,
    HDR_REAL_TOPIC,
    HDR_REAL_PARTITION,
    HDR_REAL_OFFSET,
    HDR_REAL_STORE_TIME,
    HDR_FORWARD_TO,
];

/// Populate a `Message`'s retry-ladder fields from its raw headers, and
/// strip the reserved headers out of the map the application/handler sees.
pub fn apply_reserved_headers(message: &mut Message) {
    let raw = std::mem::take(&mut message.headers);
    let mut application_headers = HashMap::with_capacity(raw.len());

    for (key, value) in raw {
        match key.as_str() {
            HDR_RETRY_COUNT => {
                if let Ok(n) = value.parse() {
                    message.retry_count = n;
                }
            }
            HDR_DELAY_LEVEL => {
                if let Ok(n) = value.parse() {
                    message.delay_level = n;
                }
            }
            HDR_REAL_TOPIC => message.real_topic = Some(value),
            HDR_REAL_PARTITION => {
                if let Ok(n) = value.parse() {
                    message.real_partition = Some(n);
                }
            }
            HDR_REAL_OFFSET => {
                if let Ok(n) = value.parse() {
                    message.real_offset = Some(n);
                }
            }
            HDR_REAL_STORE_TIME => {
                if let Ok(millis) = value.parse::<i64>() {
                    message.real_store_time = Utc.timestamp_millis_opt(millis).single();
                }
            }
            HDR_FORWARD_TO => message.forward_to = Some(value),
            other if RESERVED_HEADERS.contains(&other) => {}
            _ => {
                application_headers.insert(key, value);
            }
        }
    }

    message.headers = application_headers;
}

/// Build the header set for republishing `message` to a retry or delay
/// topic: bumps `x-retry-count`, stamps the real-* properties (first retry
/// only), and points the delay-topic consumer at `forward_to`.
pub fn build_retry_headers(
    message: &Message,
    next_retry_count: u32,
    delay_level: u8,
    forward_to: &str,
) -> HashMap<String, String> {
    let mut headers = message.headers.clone();
    headers.insert(HDR_RETRY_COUNT.to_string(), next_retry_count.to_string());
    headers.insert(HDR_DELAY_LEVEL.to_string(), delay_level.to_string());
    headers.insert(HDR_FORWARD_TO.to_string(), forward_to.to_string());

    let (real_topic, real_partition, real_offset, real_store_time) = if message.is_stamped() {
        (
            message.real_topic.clone().unwrap(),
            message.real_partition.unwrap(),
            message.real_offset.unwrap(),
            message.real_store_time.unwrap(),
        )
    } else {
        (
            message.topic.clone(),
            message.partition,
            message.offset,
            message.store_timestamp,
        )
    };
    headers.insert(HDR_REAL_TOPIC.to_string(), real_topic);
    headers.insert(HDR_REAL_PARTITION.to_string(), real_partition.to_string());
    headers.insert(HDR_REAL_OFFSET.to_string(), real_offset.to_string());
    headers.insert(
        HDR_REAL_STORE_TIME.to_string(),
        real_store_time.timestamp_millis().to_string(),
    );

    headers
}

/// Re-encode a message's current retry-ladder bookkeeping (retry count,
/// delay level, real-* provenance) as wire headers exactly as already
/// recorded on its typed fields, without bumping anything or pointing at a
/// forward target. Needed any time a message crosses a topic hop where the
/// ladder state must survive unchanged: a delay-topic forwarder's
/// republish onto the retry topic (the delay hop itself already applied
/// `apply_reserved_headers` on receipt, which strips these headers back
/// out of the map), and a dead-letter publish.
pub fn build_carryover_headers(message: &Message) -> HashMap<String, String> {
    let mut headers = build_retry_headers(message, message.retry_count, message.delay_level, "");
    headers.remove(HDR_FORWARD_TO);
    headers
}

/// Header set for a straight dead-letter publish: preserves retry-count
/// and real-* provenance but carries no forwarding instruction.
pub fn build_dead_letter_headers(message: &Message) -> HashMap<String, String> {
    build_carryover_headers(message)
}

pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.timestamp_millis().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn base_message() -> Message {
        Message {
            topic: "orders".to_string(),
            partition: 0,
            offset: 105,
            key: None,
            value: b"v".to_vec(),
            store_timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            headers: Map::new(),
            retry_count: 0,
            delay_level: 0,
            real_topic: None,
            real_partition: None,
            real_offset: None,
            real_store_time: None,
            forward_to: None,
        }
    }

    #[test]
    fn first_retry_stamps_real_from_current_placement() {
        let msg = base_message();
        let headers = build_retry_headers(&msg, 1, 2, "%RETRY%group");
        assert_eq!(headers.get(HDR_REAL_TOPIC).unwrap(), "orders");
        assert_eq!(headers.get(HDR_REAL_PARTITION).unwrap(), "0");
        assert_eq!(headers.get(HDR_REAL_OFFSET).unwrap(), "105");
        assert_eq!(headers.get(HDR_RETRY_COUNT).unwrap(), "1");
    }

    #[test]
    fn later_retry_preserves_original_real_stamp() {
        let mut msg = base_message();
        msg.topic = "%RETRY%group".to_string();
        msg.partition = 7;
        msg.offset = 9999;
        msg.retry_count = 3;
        msg.real_topic = Some("orders".to_string());
        msg.real_partition = Some(0);
        msg.real_offset = Some(105);
        msg.real_store_time = Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());

        let headers = build_retry_headers(&msg, 4, 5, "%RETRY%group");
        assert_eq!(headers.get(HDR_REAL_TOPIC).unwrap(), "orders");
        assert_eq!(headers.get(HDR_REAL_PARTITION).unwrap(), "0");
        assert_eq!(headers.get(HDR_REAL_OFFSET).unwrap(), "105");
        assert_eq!(headers.get(HDR_RETRY_COUNT).unwrap(), "4");
    }

    #[test]
    fn carryover_headers_preserve_retry_state_without_forward_to() {
        let mut msg = base_message();
        msg.topic = "%RETRY%group".to_string();
        msg.retry_count = 2;
        msg.delay_level = 3;
        msg.real_topic = Some("orders".to_string());
        msg.real_partition = Some(0);
        msg.real_offset = Some(105);
        msg.real_store_time = Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());

        let headers = build_carryover_headers(&msg);
        assert_eq!(headers.get(HDR_RETRY_COUNT).unwrap(), "2");
        assert_eq!(headers.get(HDR_DELAY_LEVEL).unwrap(), "3");
        assert_eq!(headers.get(HDR_REAL_TOPIC).unwrap(), "orders");
        assert!(!headers.contains_key(HDR_FORWARD_TO));
    }

    #[test]
    fn apply_reserved_headers_parses_and_strips() {
        let mut msg = base_message();
        msg.headers.insert(HDR_RETRY_COUNT.to_string(), "2".to_string());
        msg.headers.insert(HDR_REAL_TOPIC.to_string(), "orders".to_string());
        msg.headers
            .insert("x-application-header".to_string(), "keep-me".to_string());

        apply_reserved_headers(&mut msg);

        assert_eq!(msg.retry_count, 2);
        assert_eq!(msg.real_topic.as_deref(), Some("orders"));
        assert_eq!(msg.headers.len(), 1);
        assert_eq!(msg.headers.get("x-application-header").unwrap(), "keep-me");
    }
}
