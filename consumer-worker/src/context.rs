use std::sync::Arc;
use std::time::Duration;

use consumer_common::{ConsumeHandler, ConsumeModel, Producer, TopicNames};

use crate::dispatch_strategy::DispatchStrategy;
use crate::partition_buffer::PartitionBuffer;
use crate::retry_scheduler::RetryScheduler;

/// Everything a `TaskRequest` needs to process one batch, immutable once
/// the pipeline has started. Built once from `Config` and shared by
/// reference (`Arc`) across every partition's dispatch loop.
pub struct ConsumeContext {
    pub handler: Arc<dyn ConsumeHandler>,
    pub producer: Arc<dyn Producer>,
    pub buffer: Arc<PartitionBuffer>,
    pub dispatch_strategy: Arc<dyn DispatchStrategy>,
    pub retry: RetryScheduler,
    pub topic_names: TopicNames,
    pub consume_model: ConsumeModel,
    pub max_reconsume_count: u32,
    pub max_message_deal_time: Duration,
}

impl ConsumeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handler: Arc<dyn ConsumeHandler>,
        producer: Arc<dyn Producer>,
        buffer: Arc<PartitionBuffer>,
        dispatch_strategy: Arc<dyn DispatchStrategy>,
        retry: RetryScheduler,
        topic_names: TopicNames,
        consume_model: ConsumeModel,
        max_reconsume_count: u32,
        max_message_deal_time: Duration,
    ) -> Self {
        Self {
            handler,
            producer,
            buffer,
            dispatch_strategy,
            retry,
            topic_names,
            consume_model,
            max_reconsume_count,
            max_message_deal_time,
        }
    }
}
