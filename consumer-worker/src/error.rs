use thiserror::Error;

use consumer_common::BrokerError;

/// Errors surfaced from starting or running the consumption pipeline.
/// Transient per-message failures (publish failures, handler errors) never
/// reach this type -- they are handled entirely inside `TaskRequest` per
/// its post-processing state machine.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Raised when the `WorkerPool`'s bounded queue is full.
#[derive(Debug, Error)]
#[error("worker pool queue is full")]
pub struct QueueFullError;
