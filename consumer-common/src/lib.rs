//! Shared data model and external-collaborator interfaces for the push
//! consumer pipeline: the `Message`/`PartitionId` types, the retry-ladder
//! constants, topic naming, and the `Broker`/`Producer`/`MessageFilter`/
//! `ConsumeHandler` traits the pipeline (`consumer-worker`) is built
//! against.

pub mod broker;
pub mod delay;
pub mod filter;
pub mod handler;
pub mod message;
pub mod metrics;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod rebalance;
pub mod status;
pub mod topic;
pub mod wire;

pub use broker::{Broker, BrokerError, OutboundRecord, Producer, RecordMetadata};
pub use delay::{duration_for_level, next_delay_level, DELAY_LEVELS, MAX_DELAY_LEVEL, MAX_RECONSUME_COUNT};
pub use filter::{MessageFilter, PermitAll};
pub use handler::{ConsumeHandler, HandlerContext};
pub use message::{Message, PartitionId};
pub use rebalance::RebalanceListener;
pub use status::{ConsumeModel, ConsumeStatus};
pub use topic::TopicNames;
pub use wire::{
    apply_reserved_headers, build_carryover_headers, build_dead_letter_headers, build_retry_headers,
    encode_timestamp, HDR_DELAY_LEVEL, HDR_FORWARD_TO, HDR_REAL_OFFSET, HDR_REAL_PARTITION,
    HDR_REAL_STORE_TIME, HDR_REAL_TOPIC, HDR_RETRY_COUNT,
};
