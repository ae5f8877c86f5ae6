//! Received event type.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single event received from a partition.
///
/// `offset` and `sequence_number` together identify the event's position in
/// the partition log; either one can be checkpointed to resume strictly
/// after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedEvent {
    /// Event payload.
    pub body: Bytes,

    /// Byte offset of the event within the partition.
    pub offset: i64,

    /// Monotonic per-partition sequence number.
    pub sequence_number: i64,

    /// When the service enqueued the event, milliseconds since epoch.
    pub enqueued_time_ms: i64,
}

impl ReceivedEvent {
    pub fn new(body: impl Into<Bytes>, offset: i64, sequence_number: i64) -> Self {
        Self {
            body: body.into(),
            offset,
            sequence_number,
            enqueued_time_ms: 0,
        }
    }
}
