//! Stream addressing and consumer identity types.
//!
//! ## Design Decisions
//!
//! - All identity components are strings; the persisted form is lowercase
//!   and the stores canonicalize, so these types carry caller casing as-is
//! - `client_id` is unique per running consumer instance; it is the value
//!   written into ownership records as the owner
//! - Timestamps elsewhere in the workspace are i64 milliseconds since epoch

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of one running consumer instance.
///
/// The `(fully_qualified_namespace, event_stream_name, consumer_group)`
/// triple names the stream being consumed; `client_id` distinguishes this
/// instance from every other member of the same consumer group. Two
/// processes with the same `client_id` would treat each other's ownership
/// records as their own, so the id must be unique per instance - when not
/// supplied, a fresh UUID is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    /// Namespace host, e.g. "example.servicebus.windows.net"
    pub fully_qualified_namespace: String,

    /// Name of the event stream within the namespace
    pub event_stream_name: String,

    /// Consumer group this instance belongs to
    pub consumer_group: String,

    /// Unique id for this running instance (the ownership record owner)
    pub client_id: String,
}

impl ConsumerIdentity {
    /// Create an identity with a generated `client_id`.
    pub fn new(
        fully_qualified_namespace: impl Into<String>,
        event_stream_name: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            fully_qualified_namespace: fully_qualified_namespace.into(),
            event_stream_name: event_stream_name.into(),
            consumer_group: consumer_group.into(),
            client_id: Uuid::new_v4().to_string(),
        }
    }

    /// Replace the generated `client_id` with a caller-supplied one.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

/// Metadata about an event stream, fetched from the transport when the
/// processor starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProperties {
    /// Stream name
    pub name: String,

    /// All partition ids for the stream
    pub partition_ids: Vec<String>,
}

/// Where to begin consuming a partition when no checkpoint exists.
///
/// `Offset` and `SequenceNumber` are exclusive: consumption resumes
/// strictly after the given position. This is what makes checkpoint resume
/// at-least-once without replaying the checkpointed event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartPosition {
    /// Oldest available event.
    Earliest,
    /// Only events enqueued after the receiver link opens.
    Latest,
    /// Strictly after the given offset.
    Offset(i64),
    /// Strictly after the given sequence number.
    SequenceNumber(i64),
}

impl Default for StartPosition {
    fn default() -> Self {
        StartPosition::Latest
    }
}

/// Default and per-partition start positions for a processor.
///
/// A checkpoint, when present, always wins over both of these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartPositions {
    /// Used for any partition without a per-partition override.
    pub default: StartPosition,

    /// Overrides keyed by partition id.
    pub per_partition: HashMap<String, StartPosition>,
}
