//! Error types shared across the conveyor client crates.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport layer and shared value types.
///
/// `OwnershipLost` is the one condition callers are expected to branch on:
/// it means another consumer has claimed the partition and opened a
/// higher-priority link, so the receiver that returned it is permanently
/// dead. Every other transport failure is retried below this layer.
#[derive(Debug, Error)]
pub enum Error {
    /// Another consumer claimed the partition and stole the link. The
    /// receiver that returned this is unusable; the processor will either
    /// re-acquire the partition on a later round or cede it.
    #[error("ownership of partition {partition_id} was lost to another consumer")]
    OwnershipLost { partition_id: String },

    /// Transport-level failure that was not recoverable by the transport's
    /// own retry policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration detected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether this error is the distinguished ownership-lost condition.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(self, Error::OwnershipLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_lost_is_distinguishable() {
        let err = Error::OwnershipLost {
            partition_id: "3".to_string(),
        };
        assert!(err.is_ownership_lost());

        let err = Error::Transport("link detached".to_string());
        assert!(!err.is_ownership_lost());
    }
}
