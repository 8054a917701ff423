use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use consumer_common::{
    Broker, BrokerError, ConsumeHandler, ConsumeModel, MessageFilter, PartitionId, Producer,
    RebalanceListener, TopicNames,
};
use health::HealthHandle;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::context::ConsumeContext;
use crate::delay_forwarder::DelayTopicForwarder;
use crate::dispatch_strategy::{Concurrent, DispatchStrategy};
use crate::dispatcher::Dispatcher;
use crate::offset_persistor::{BrokerOffsetPersistor, FileOffsetPersistor, OffsetPersistor};
use crate::partition_buffer::PartitionBuffer;
use crate::poll_loop::{PollCommand, PollLoop, PollLoopHandle};
use crate::retry_scheduler::RetryScheduler;
use crate::worker_pool::WorkerPool;

/// Bundles everything the broker side needs to stay in the loop: what
/// `OffsetPersistor::on_revoked`/`on_assigned` does for commit bookkeeping,
/// followed by telling the `Dispatcher` to stop/start draining the
/// affected partitions. Kept separate from the persistor itself so the
/// persistor stays plain commit bookkeeping, unaware of dispatch.
struct PipelineRebalanceListener {
    persistor: Arc<dyn RebalanceListener>,
    dispatcher: Arc<Dispatcher>,
}

impl RebalanceListener for PipelineRebalanceListener {
    fn on_revoked(&self, partitions: &[PartitionId]) {
        info!(count = partitions.len(), "partitions revoked");
        self.persistor.on_revoked(partitions);
        self.dispatcher.revoke(partitions);
    }

    fn on_assigned(&self, partitions: &[PartitionId]) {
        info!(count = partitions.len(), "partitions assigned");
        self.persistor.on_assigned(partitions);
        self.dispatcher.assign(partitions);
    }
}

/// The health-handle triplet registered for the three always-on
/// background loops. Each is optional independently so tests (and a
/// `suspend`-only embedding) can run without a `HealthRegistry` at all.
#[derive(Default, Clone)]
pub struct PipelineLiveness {
    pub poll_loop: Option<HealthHandle>,
    pub offset_persistor: Option<HealthHandle>,
    pub delay_forwarders: Option<HealthHandle>,
}

/// Owns every task the consumption pipeline spawns and exposes the client's
/// public lifecycle: `suspend`/`resume`, the `seek*` family, and cooperative
/// `shutdown`. Built by [`ConsumePipeline::start`],
/// which also returns the `RebalanceListener` the caller must wire into its
/// `Broker`'s rebalance callback (a detail specific to the concrete broker
/// binding, e.g. `consumer-kafka::KafkaContext::rebalance_slot`) before the
/// initial `subscribe` is sent -- otherwise the first assignment is missed.
pub struct ConsumePipeline {
    running: Arc<AtomicBool>,
    poll_loop: PollLoopHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumePipeline {
    /// `delay_broker_factory` must build a brand-new broker/consumer
    /// instance on every call. Each `DelayTopicForwarder` gets its own,
    /// since the broker client is not thread-safe and `subscribe` replaces
    /// a consumer's whole subscription set -- one shared between the poll
    /// loop and the forwarders would have them clobber each other's
    /// subscriptions and race on `poll`. Only called in CLUSTERING mode,
    /// where delay topics are in play.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        config: &Config,
        broker: Arc<dyn Broker>,
        producer: Arc<dyn Producer>,
        handler: Arc<dyn ConsumeHandler>,
        filter: Arc<dyn MessageFilter>,
        liveness: PipelineLiveness,
        delay_broker_factory: Arc<dyn Fn() -> Result<Arc<dyn Broker>, BrokerError> + Send + Sync>,
    ) -> (Self, Arc<dyn RebalanceListener>) {
        let running = Arc::new(AtomicBool::new(true));
        let consume_model = config.consume_model.0;
        let group_id = config.consumer.kafka_consumer_group.clone();
        let topic_names = TopicNames::new(group_id.clone());

        let buffer = Arc::new(PartitionBuffer::new(config.partition_buffer_capacity));

        let (poll_loop, poll_loop_handle) = PollLoop::new(
            broker.clone(),
            buffer.clone(),
            filter,
            config.poll_message_await_timeout_ms.0,
            liveness.poll_loop,
            running.clone(),
        );
        let poll_loop_task = poll_loop.spawn();

        let worker_pool = Arc::new(WorkerPool::new(config.consume_thread_num, config.consume_queue_size));
        let retry_scheduler = RetryScheduler::new(worker_pool.clone());
        let dispatch_strategy: Arc<dyn DispatchStrategy> = Arc::new(Concurrent);

        let task_ctx = Arc::new(ConsumeContext::new(
            handler,
            producer.clone(),
            buffer.clone(),
            dispatch_strategy,
            retry_scheduler.clone(),
            topic_names.clone(),
            consume_model,
            consumer_common::MAX_RECONSUME_COUNT,
            config.max_message_deal_time_ms.0,
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            buffer.clone(),
            worker_pool,
            retry_scheduler,
            task_ctx,
            config.consume_batch_size as usize,
            Duration::from_millis(50),
            Duration::from_secs(1),
            running.clone(),
        ));

        let (persistor, persistor_task): (Arc<dyn RebalanceListener>, JoinHandle<()>) = match consume_model {
            ConsumeModel::Clustering => {
                let persistor = Arc::new(BrokerOffsetPersistor::new(
                    broker.clone(),
                    poll_loop_handle.clone(),
                    buffer.clone(),
                    liveness.offset_persistor,
                ));
                let task = persistor.clone().spawn(config.offset_commit_interval_ms.0, running.clone());
                (persistor as Arc<dyn RebalanceListener>, task)
            }
            ConsumeModel::Broadcasting => {
                let persistor = Arc::new(FileOffsetPersistor::new(
                    broker.clone(),
                    buffer.clone(),
                    group_id,
                    Path::new(&config.offset_store_dir),
                    liveness.offset_persistor,
                ));
                let task = persistor.clone().spawn(config.offset_commit_interval_ms.0, running.clone());
                (persistor as Arc<dyn RebalanceListener>, task)
            }
        };

        let rebalance_listener: Arc<dyn RebalanceListener> =
            Arc::new(PipelineRebalanceListener { persistor, dispatcher });

        let mut tasks = vec![poll_loop_task, persistor_task];
        if consume_model == ConsumeModel::Clustering {
            for level in 1..=consumer_common::MAX_DELAY_LEVEL {
                let delay_broker = match delay_broker_factory() {
                    Ok(delay_broker) => delay_broker,
                    Err(error) => {
                        error!(%error, level, "failed to build delay forwarder broker, skipping level");
                        continue;
                    }
                };
                let forwarder = DelayTopicForwarder::new(
                    level,
                    TopicNames::delay_topic(level),
                    delay_broker,
                    producer.clone(),
                    config.poll_message_await_timeout_ms.0,
                    liveness.delay_forwarders.clone(),
                );
                tasks.push(forwarder.spawn(running.clone()));
            }
        }

        (
            Self {
                running,
                poll_loop: poll_loop_handle,
                tasks,
            },
            rebalance_listener,
        )
    }

    /// Subscribe to the application topics plus the retry topic. The DLQ
    /// topic is deliberately never subscribed -- it is a terminus, not an
    /// input. Must be called only after the caller has wired the `RebalanceListener`
    /// returned by `start` into the broker, or the first assignment's
    /// callback is silently dropped.
    pub async fn subscribe(&self, application_topics: Vec<String>, retry_topic: String) {
        let mut topics = application_topics;
        topics.push(retry_topic);
        self.poll_loop.send(PollCommand::Subscribe(topics)).await;
    }

    /// Flip the poll loop into a no-poll wait. Idempotent.
    pub fn suspend(&self) {
        self.poll_loop.suspend();
    }

    pub fn resume(&self) {
        self.poll_loop.resume();
    }

    pub async fn seek(&self, partition: PartitionId, offset: i64) {
        self.poll_loop.send(PollCommand::Seek { partition, offset }).await;
    }

    pub async fn seek_to_beginning(&self, partitions: Vec<PartitionId>) {
        self.poll_loop.send(PollCommand::SeekToBeginning(partitions)).await;
    }

    pub async fn seek_to_end(&self, partitions: Vec<PartitionId>) {
        self.poll_loop.send(PollCommand::SeekToEnd(partitions)).await;
    }

    /// Clear the running flag and wait for every background task to
    /// observe it and exit. The poll loop's own blocking thread notices on
    /// its next iteration boundary; tasks already mid-flight (an in-flight
    /// `TaskRequest`, a `DelayTopicForwarder` mid-sleep) are allowed to run
    /// to completion rather than aborted.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "pipeline task panicked during shutdown");
            }
        }
    }
}
