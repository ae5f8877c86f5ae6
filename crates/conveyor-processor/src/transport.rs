//! Transport collaborator traits.
//!
//! The processor does not speak any wire protocol itself. It consumes a
//! transport through these two traits and leaves session/link management,
//! connection recovery, credit flow and retry policy entirely to the
//! implementation. The one obligation the processor puts on a transport is
//! that a competing claimant opening the same partition at an equal or
//! higher owner level must surface here as
//! [`conveyor_core::Error::OwnershipLost`] - that is how a consumer learns
//! the load balancer ceded its partition to someone else.

use async_trait::async_trait;
use conveyor_core::{ReceivedEvent, StartPosition, StreamProperties};
use std::time::Duration;

/// A connection to one event stream, able to report stream metadata and
/// open per-partition receivers.
#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Fetch stream metadata, including the full partition id list.
    async fn properties(&self) -> conveyor_core::Result<StreamProperties>;

    /// Open a receiver link on one partition, eagerly: the link must be
    /// live before this returns. `owner_level` is the epoch used for link
    /// stealing; the processor always passes one so that a newer claimant
    /// supersedes this receiver rather than coexisting with it.
    async fn open_receiver(
        &self,
        partition_id: &str,
        start_position: StartPosition,
        owner_level: Option<i64>,
    ) -> conveyor_core::Result<Box<dyn PartitionReceiver>>;
}

/// A live receiver link on one partition.
#[async_trait]
pub trait PartitionReceiver: Send + Sync {
    /// Receive up to `max_count` events, waiting at most `max_wait`. May
    /// return fewer than requested (including none) when the deadline
    /// elapses first. Returns `Error::OwnershipLost` if the link was stolen
    /// by another claimant.
    async fn receive(
        &mut self,
        max_count: usize,
        max_wait: Duration,
    ) -> conveyor_core::Result<Vec<ReceivedEvent>>;

    /// Close the link.
    async fn close(&mut self) -> conveyor_core::Result<()>;
}
