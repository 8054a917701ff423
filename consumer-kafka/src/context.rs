use std::sync::{Arc, RwLock};

use consumer_common::{PartitionId, RebalanceListener};
use health::HealthHandle;
use rdkafka::consumer::Rebalance;
use rdkafka::topic_partition_list::TopicPartitionList;
use tracing::warn;

/// Shared `rdkafka::ClientContext` for both the consumer and the producer.
/// Reports liveness from the stats callback, which librdkafka invokes on
/// its own background thread at `statistics.interval.ms` whenever the
/// client is actually talking to the cluster.
///
/// Also the glue between librdkafka's rebalance callback and
/// `consumer-worker`'s `RebalanceListener` trait: the listener is wired in
/// after construction (`set_rebalance_listener`), since the concrete
/// `OffsetPersistor` that plays that role is built from a `Broker` handle
/// that itself is only available once this context has already been moved
/// into the consumer.
#[derive(Clone)]
pub struct KafkaContext {
    liveness: Option<HealthHandle>,
    rebalance_listener: Arc<RwLock<Option<Arc<dyn RebalanceListener>>>>,
}

impl KafkaContext {
    pub fn new(liveness: Option<HealthHandle>) -> Self {
        Self {
            liveness,
            rebalance_listener: Arc::new(RwLock::new(None)),
        }
    }

    /// A cheaply-cloneable slot callers keep to install the rebalance
    /// listener once it exists, without needing the context back from the
    /// consumer it was moved into.
    pub fn rebalance_slot(&self) -> Arc<RwLock<Option<Arc<dyn RebalanceListener>>>> {
        self.rebalance_listener.clone()
    }

    fn partitions_of(tpl: &TopicPartitionList) -> Vec<PartitionId> {
        tpl.elements()
            .iter()
            .map(|e| PartitionId::new(e.topic(), e.partition()))
            .collect()
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _stats: rdkafka::Statistics) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy_blocking();
        }
    }
}

impl rdkafka::consumer::ConsumerContext for KafkaContext {
    /// Called before librdkafka applies a revoke: the partition is still
    /// ours, so this is the last safe moment to flush a commit for it.
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let Ok(guard) = self.rebalance_listener.read() else {
                warn!("rebalance listener lock poisoned, skipping revoke callback");
                return;
            };
            if let Some(listener) = guard.as_ref() {
                listener.on_revoked(&Self::partitions_of(tpl));
            }
        }
    }

    /// Called after librdkafka applies an assign: the partition is ours
    /// now, so this is the right moment to seek to a persisted offset.
    fn post_rebalance(&self, rebalance: &Rebalance) {
        if let Rebalance::Assign(tpl) = rebalance {
            let Ok(guard) = self.rebalance_listener.read() else {
                warn!("rebalance listener lock poisoned, skipping assign callback");
                return;
            };
            if let Some(listener) = guard.as_ref() {
                listener.on_assigned(&Self::partitions_of(tpl));
            }
        }
    }
}
