use std::sync::Arc;

use consumer_common::{ConsumeStatus, HandlerContext, Message, PartitionId};
use tracing::warn;

use crate::context::ConsumeContext;
use crate::dispatch_strategy::RetryOutcome;
use crate::retry_scheduler::LOCAL_RETRY_BACKOFF;

/// One batch handed to a single `ConsumeHandler` invocation, plus whatever
/// post-processing its `ConsumeStatus` demands. `release_buffer_claim` is
/// true only for the batch that actually came out of `PartitionBuffer::drain_ready`;
/// a `TaskRequest` rebuilt from a local-retry list does not hold that claim
/// and must not release it a second time.
#[derive(Clone)]
pub struct TaskRequest {
    messages: Vec<Message>,
    partition: PartitionId,
    ctx: Arc<ConsumeContext>,
    release_buffer_claim: bool,
}

impl TaskRequest {
    pub fn new(
        messages: Vec<Message>,
        partition: PartitionId,
        ctx: Arc<ConsumeContext>,
        release_buffer_claim: bool,
    ) -> Self {
        Self {
            messages,
            partition,
            ctx,
            release_buffer_claim,
        }
    }

    pub async fn run(self) {
        let TaskRequest {
            mut messages,
            partition,
            ctx,
            release_buffer_claim,
        } = self;

        if partition.topic == ctx.topic_names.retry_topic() {
            for message in &mut messages {
                message.rehydrate();
            }
        }

        let first_offset = messages.first().map(|m| m.offset).unwrap_or_default();
        let mut handler_ctx = HandlerContext::new(messages.len(), first_offset);
        let status = match tokio::time::timeout(
            ctx.max_message_deal_time,
            ctx.handler.consume(&messages, &mut handler_ctx),
        )
        .await
        {
            Ok(status) => status,
            Err(_elapsed) => {
                warn!(partition = %partition, "handler exceeded max_message_deal_time, treating as RETRY_LATER");
                ConsumeStatus::RetryLater
            }
        };

        let mut acked_offsets = Vec::new();
        let mut local_retry = Vec::new();

        match status {
            ConsumeStatus::Success => acked_offsets.extend(messages.iter().map(|m| m.offset)),
            ConsumeStatus::RetryLater => {
                let flags = handler_ctx.success_flags().to_vec();
                for (idx, mut message) in messages.into_iter().enumerate() {
                    if flags.get(idx).copied().unwrap_or(true) {
                        acked_offsets.push(message.offset);
                        continue;
                    }

                    let outcome = ctx
                        .dispatch_strategy
                        .handle_retry(
                            ctx.producer.as_ref(),
                            &ctx.topic_names,
                            ctx.consume_model,
                            ctx.max_reconsume_count,
                            &mut message,
                            handler_ctx.delay_override(),
                        )
                        .await;
                    match outcome {
                        RetryOutcome::AckNow => acked_offsets.push(message.offset),
                        RetryOutcome::LocalRetry => local_retry.push(message),
                    }
                }
            }
        }

        if !acked_offsets.is_empty() {
            ctx.buffer.ack(&partition, &acked_offsets);
        }
        if release_buffer_claim {
            ctx.buffer.release(&partition);
        }

        if !local_retry.is_empty() {
            let retry_task = TaskRequest::new(local_retry, partition, ctx.clone(), false);
            ctx.retry.schedule(retry_task, LOCAL_RETRY_BACKOFF);
        }
    }
}
