//! Demonstration binary wiring the generic `ConsumePipeline` to the
//! `rdkafka`-backed broker/producer. Embedding applications are expected to
//! supply their own `ConsumeHandler`; this binary's `LoggingHandler` exists
//! only to give the wiring somewhere to terminate.
use std::future::ready;
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use consumer_common::metrics::{serve, setup_metrics_router};
use consumer_common::{
    Broker, ConsumeHandler, ConsumeStatus, HandlerContext, Message, PermitAll, TopicNames,
};
use consumer_kafka::{KafkaContext, RdKafkaBroker, RdKafkaProducer};
use consumer_worker::config::Config;
use consumer_worker::error::WorkerError;
use consumer_worker::pipeline::{ConsumePipeline, PipelineLiveness};
use health::HealthRegistry;

struct LoggingHandler;

#[async_trait]
impl ConsumeHandler for LoggingHandler {
    async fn consume(&self, messages: &[Message], _ctx: &mut HandlerContext) -> ConsumeStatus {
        for message in messages {
            tracing::info!(id = %message.id(), len = message.value.len(), "consumed message");
        }
        ConsumeStatus::Success
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");
    config.validate()?;

    let liveness = HealthRegistry::new("liveness");
    let kafka_client_liveness = liveness
        .register("kafka_client".to_string(), time::Duration::seconds(30))
        .await;
    let poll_loop_liveness = liveness
        .register("poll_loop".to_string(), time::Duration::seconds(30))
        .await;
    let offset_persistor_liveness = liveness
        .register("offset_persistor".to_string(), time::Duration::seconds(30))
        .await;
    let delay_forwarders_liveness = liveness
        .register("delay_forwarders".to_string(), time::Duration::seconds(30))
        .await;

    let consumer_context = KafkaContext::new(Some(kafka_client_liveness.clone()));
    let rebalance_slot = consumer_context.rebalance_slot();
    let producer_context = KafkaContext::new(Some(kafka_client_liveness.clone()));

    let broker = Arc::new(RdKafkaBroker::new(&config.kafka, &config.consumer, consumer_context)?);
    let producer = Arc::new(RdKafkaProducer::new(&config.kafka, producer_context)?);

    let handler: Arc<dyn ConsumeHandler> = Arc::new(LoggingHandler);
    let topic_names = TopicNames::new(config.consumer.kafka_consumer_group.clone());

    // Each `DelayTopicForwarder` gets its own `BaseConsumer`, built fresh
    // here on demand -- the broker client isn't thread-safe and can't be
    // shared with the main poll loop or between forwarders.
    let kafka_config = config.kafka.clone();
    let consumer_config = config.consumer.clone();
    let delay_broker_factory: Arc<dyn Fn() -> Result<Arc<dyn Broker>, consumer_common::BrokerError> + Send + Sync> =
        Arc::new(move || {
            let context = KafkaContext::new(Some(kafka_client_liveness.clone()));
            let broker = RdKafkaBroker::new(&kafka_config, &consumer_config, context)?;
            Ok(Arc::new(broker) as Arc<dyn Broker>)
        });

    let (pipeline, rebalance_listener) = ConsumePipeline::start(
        &config,
        broker,
        producer,
        handler,
        Arc::new(PermitAll),
        PipelineLiveness {
            poll_loop: Some(poll_loop_liveness),
            offset_persistor: Some(offset_persistor_liveness),
            delay_forwarders: Some(delay_forwarders_liveness),
        },
        delay_broker_factory,
    );

    // Must happen before `subscribe`, or the first assignment's rebalance
    // callback fires with no listener installed yet.
    *rebalance_slot.write().expect("rebalance slot lock poisoned") = Some(rebalance_listener);
    pipeline.subscribe(config.topics(), topic_names.retry_topic()).await;

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = router.merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    pipeline.shutdown().await;

    Ok(())
}

async fn index() -> &'static str {
    "consumer-worker"
}
