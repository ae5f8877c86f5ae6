//! Ownership and checkpoint record types.
//!
//! Both record kinds are keyed by the same composite address:
//! `(fully_qualified_namespace, event_stream_name, consumer_group,
//! partition_id)`, lowercased in persisted form.
//!
//! ## Ownership lifecycle
//!
//! An ownership record is created by the first successful claim for its
//! partition, mutated (owner, token, timestamp) by every successful
//! re-claim, and never deleted - release is implicit: once
//! `last_modified_ms` falls further in the past than the configured
//! partition expiration, the record is logically unowned even though it
//! still physically exists. Expiry is an interpretation applied by the load
//! balancer, not by the store.

use serde::{Deserialize, Serialize};

/// A partition ownership record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// Namespace host, e.g. "example.servicebus.windows.net"
    pub fully_qualified_namespace: String,

    /// Event stream name
    pub event_stream_name: String,

    /// Consumer group
    pub consumer_group: String,

    /// Partition id
    pub partition_id: String,

    /// Client id of the owning consumer instance
    pub owner_id: String,

    /// When the record was last written, milliseconds since epoch.
    /// Zero for synthetic records that have no backing store entry yet.
    pub last_modified_ms: i64,

    /// Opaque version token for conditional claims. `None` marks a record
    /// with no physical store entry to race against (a newly discovered
    /// unowned partition, or one surfaced from a legacy blob name); a claim
    /// submitted without a token only succeeds if the record still does not
    /// exist.
    pub etag: Option<String>,
}

/// A checkpoint record: the caller's last processed position in one
/// partition.
///
/// The store does not enforce monotonicity - the processor guarantees a
/// single active receiver per partition through ownership, and that
/// receiver only ever checkpoints forward. On resume, consumption restarts
/// strictly after the recorded position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Namespace host
    pub fully_qualified_namespace: String,

    /// Event stream name
    pub event_stream_name: String,

    /// Consumer group
    pub consumer_group: String,

    /// Partition id
    pub partition_id: String,

    /// Byte offset of the last processed event
    pub offset: Option<i64>,

    /// Sequence number of the last processed event
    pub sequence_number: Option<i64>,
}
