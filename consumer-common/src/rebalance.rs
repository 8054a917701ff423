use crate::message::PartitionId;

/// The broker's rebalance listener. Lives here rather
/// than in `consumer-worker` so the concrete broker binding
/// (`consumer-kafka`) can wire its own rebalance callback into whichever
/// `OffsetPersistor` variant `consumer-worker` constructs, without a
/// dependency cycle between the two crates.
pub trait RebalanceListener: Send + Sync {
    /// Partitions the broker is about to take away. Must flush any
    /// still-safe commit before returning, since the broker may hand the
    /// partition to another consumer the moment this returns.
    fn on_revoked(&self, partitions: &[PartitionId]);

    /// Partitions newly assigned to this consumer. File-backed persistors
    /// seek to their last-persisted offset here; broker-backed ones trust
    /// the broker's own committed offsets and do nothing beyond
    /// recognizing the partition.
    fn on_assigned(&self, partitions: &[PartitionId]);
}
