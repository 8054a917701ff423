use std::str::FromStr;

use tracing::warn;

/// Outcome of a handler invocation for a batch (or a message within one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStatus {
    Success,
    RetryLater,
}

/// Handlers embedded via config-driven plugins may report their status as a
/// raw string rather than the native enum. Unknown values are treated as
/// `Success` with a warning, matching the rest of this project's "never let
/// a foreign value wedge the pipeline" error policy.
impl FromStr for ConsumeStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(ConsumeStatus::Success),
            "RETRY_LATER" => Ok(ConsumeStatus::RetryLater),
            other => {
                warn!(status = other, "unknown ConsumeStatus, treating as SUCCESS");
                Ok(ConsumeStatus::Success)
            }
        }
    }
}

/// Which model partitions are distributed to consumers under, and where
/// progress is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeModel {
    /// Partitions are distributed across consumers in the group; progress
    /// is committed to the broker.
    Clustering,
    /// Every consumer reads every partition; progress is persisted to a
    /// local file per (group, topic, partition).
    Broadcasting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_statuses() {
        assert_eq!("SUCCESS".parse::<ConsumeStatus>().unwrap(), ConsumeStatus::Success);
        assert_eq!(
            "retry_later".parse::<ConsumeStatus>().unwrap(),
            ConsumeStatus::RetryLater
        );
    }

    #[test]
    fn unknown_status_defaults_to_success() {
        assert_eq!("WAT".parse::<ConsumeStatus>().unwrap(), ConsumeStatus::Success);
    }
}
