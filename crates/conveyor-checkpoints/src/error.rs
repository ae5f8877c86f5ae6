//! Error types for checkpoint store operations.
//!
//! A lost claim race is deliberately NOT an error - contention is the
//! normal operating mode of the store, and losing entries are silently
//! dropped from the claim result. Only genuine store failures (backing
//! store unreachable, malformed persisted data) surface here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store error: {0}")]
    Blob(#[from] object_store::Error),

    #[error("checkpoint for partition {partition_id} has no {field} set")]
    InvalidCheckpoint {
        partition_id: String,
        field: &'static str,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("malformed {field} metadata on blob {path}: {value:?}")]
    MalformedMetadata {
        field: &'static str,
        path: String,
        value: String,
    },
}
