//! Caller-facing per-partition client.

use crate::error::{ProcessorError, Result};
use crate::transport::PartitionReceiver;
use conveyor_checkpoints::{Checkpoint, CheckpointStore};
use conveyor_core::ReceivedEvent;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Partition-id-keyed registry of the receivers one processor instance has
/// live. This is the only locally shared mutable state in the processor;
/// insert-if-absent under its write lock is what prevents the same
/// partition from being wired up twice within one instance.
pub(crate) type ActiveClients = RwLock<HashMap<String, TrackedClient>>;

/// Registry entry. `Pending` reserves the slot while the receiver link is
/// still being opened, so a failed open can release it.
pub(crate) enum TrackedClient {
    Pending,
    Ready(Arc<ProcessorPartitionClient>),
}

/// A live, owned partition handed to the caller by
/// [`crate::Processor::next_partition_client`].
///
/// The client wraps one receiver link plus the checkpoint store. Events are
/// at-least-once: call [`update_checkpoint`](Self::update_checkpoint) only
/// after an event is fully handled, and tolerate re-delivery of anything
/// after the last checkpoint if a crash lands between the two.
pub struct ProcessorPartitionClient {
    fully_qualified_namespace: String,
    event_stream_name: String,
    consumer_group: String,
    partition_id: String,
    receiver: Mutex<Option<Box<dyn PartitionReceiver>>>,
    store: Arc<dyn CheckpointStore>,
    active: Weak<ActiveClients>,
}

impl ProcessorPartitionClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        fully_qualified_namespace: String,
        event_stream_name: String,
        consumer_group: String,
        partition_id: String,
        receiver: Box<dyn PartitionReceiver>,
        store: Arc<dyn CheckpointStore>,
        active: Weak<ActiveClients>,
    ) -> Self {
        Self {
            fully_qualified_namespace,
            event_stream_name,
            consumer_group,
            partition_id,
            receiver: Mutex::new(Some(receiver)),
            store,
            active,
        }
    }

    /// The partition this client receives from.
    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Receive up to `max_count` events, waiting at most `max_wait`. May
    /// return fewer (including none) when the deadline elapses first.
    ///
    /// An error for which [`ProcessorError::is_ownership_lost`] is true
    /// means another consumer took this partition: stop using this client
    /// and wait for the processor's next round to settle who owns what.
    pub async fn receive_events(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedEvent>> {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver
            .as_mut()
            .ok_or_else(|| ProcessorError::ClientClosed(self.partition_id.clone()))?;

        Ok(receiver.receive(max_count, max_wait).await?)
    }

    /// Record `event` as the last processed position for this partition.
    ///
    /// Unconditional upsert - only the current owner calls this, so there
    /// is nothing to race with. On the next acquisition (by anyone),
    /// consumption resumes strictly after this event.
    pub async fn update_checkpoint(&self, event: &ReceivedEvent) -> Result<()> {
        self.store
            .update_checkpoint(Checkpoint {
                fully_qualified_namespace: self.fully_qualified_namespace.clone(),
                event_stream_name: self.event_stream_name.clone(),
                consumer_group: self.consumer_group.clone(),
                partition_id: self.partition_id.clone(),
                offset: Some(event.offset),
                sequence_number: Some(event.sequence_number),
            })
            .await?;

        debug!(
            partition_id = %self.partition_id,
            sequence_number = event.sequence_number,
            offset = event.offset,
            "checkpoint updated"
        );
        Ok(())
    }

    /// Close the receiver link and drop this partition from the
    /// processor's active set, so a later round can wire it up again.
    /// Store ownership is not released - it expires on its own.
    pub async fn close(&self) -> Result<()> {
        if let Some(active) = self.active.upgrade() {
            active.write().await.remove(&self.partition_id);
        }

        let mut receiver = self.receiver.lock().await;
        if let Some(mut receiver) = receiver.take() {
            receiver.close().await?;
        }
        Ok(())
    }
}
