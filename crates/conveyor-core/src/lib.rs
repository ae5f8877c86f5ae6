//! Conveyor Core Types
//!
//! Shared value types for the conveyor event stream processing client:
//! stream addressing, consumer identity, received events, and start
//! positions. Everything here is plain data - the coordination logic lives
//! in `conveyor-checkpoints` (the shared ownership/checkpoint store) and
//! `conveyor-processor` (the load-balancing consumer loop).
//!
//! ## Addressing
//!
//! A partition is addressed by the tuple
//! `(fully_qualified_namespace, event_stream_name, consumer_group,
//! partition_id)`. The persisted form of every component is lowercase; the
//! store implementations canonicalize on write and read so that callers can
//! pass addresses in whatever casing they have on hand.

pub mod error;
pub mod event;
pub mod types;

pub use error::{Error, Result};
pub use event::ReceivedEvent;
pub use types::{ConsumerIdentity, StartPosition, StartPositions, StreamProperties};
