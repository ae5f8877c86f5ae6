//! Conveyor Checkpoint Store
//!
//! Durable, shared coordination substrate for the conveyor processor.
//! Multiple consumer processes - with no network path between them - agree
//! on partition ownership and record consumption progress purely through
//! this store.
//!
//! ## What Does This Do?
//!
//! The store holds two record kinds per partition:
//! - **Ownership**: which consumer instance currently owns the partition,
//!   guarded by an opaque version token (compare-and-swap on write)
//! - **Checkpoint**: the last processed offset/sequence number, written
//!   unconditionally by the current owner
//!
//! Ownership requires mutual exclusion, so claims are conditional;
//! checkpoint progress does not (the processor guarantees one active
//! receiver per partition through ownership), so checkpoint writes are
//! plain upserts.
//!
//! ## Implementations
//!
//! - [`InMemoryCheckpointStore`]: process-local, used by tests and by
//!   single-process setups that only need restart-free coordination
//! - [`BlobCheckpointStore`]: production implementation over any
//!   `object_store::ObjectStore` backend, using blob ETags as version
//!   tokens
//!
//! ## Contention Model
//!
//! `claim_ownership` attempts each requested claim independently. A claim
//! whose token no longer matches the store's current token is silently
//! dropped from the result - it is not an error, and an empty result is a
//! perfectly normal outcome when many consumers race. Callers re-evaluate
//! on their next balancing round rather than retrying inline.
//!
//! ## Usage
//!
//! ```ignore
//! use conveyor_checkpoints::{BlobCheckpointStore, CheckpointStore};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn CheckpointStore> =
//!     Arc::new(BlobCheckpointStore::new(object_store));
//!
//! let ownerships = store
//!     .list_ownership("ns.example.net", "orders", "$Default")
//!     .await?;
//! ```

pub mod blob;
pub mod error;
pub mod in_memory;
pub mod types;

pub use blob::BlobCheckpointStore;
pub use error::{Result, StoreError};
pub use in_memory::InMemoryCheckpointStore;
pub use types::{Checkpoint, Ownership};

use async_trait::async_trait;

/// Checkpoint store trait - abstracts over coordination backends.
///
/// All implementations must be safe for concurrent callers against the
/// same backing store, including callers in different processes: the only
/// atomicity the contract relies on is per-key conditional write.
///
/// ## Thread Safety
///
/// Implementations are `Send + Sync` and shared as
/// `Arc<dyn CheckpointStore>`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Attempt every claim in `ownerships` independently.
    ///
    /// For each entry: if its `etag` matches the store's current token for
    /// that partition (or both are absent), the claim succeeds and the
    /// returned record carries a fresh token and timestamp. Entries that
    /// lose the compare-and-swap race are dropped from the result without
    /// error. A genuine store failure aborts the whole call.
    async fn claim_ownership(&self, ownerships: Vec<Ownership>) -> Result<Vec<Ownership>>;

    /// List all physically-existing ownership records for the stream.
    ///
    /// Partitions with no record are simply absent; callers compute
    /// "unowned" as "not in this list".
    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>>;

    /// List all checkpoint records for the stream.
    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>>;

    /// Unconditionally upsert one checkpoint record.
    ///
    /// No version token is involved; only the current owner writes
    /// checkpoints, so races are impossible by construction.
    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;
}

/// Lowercased composite key shared by both store implementations, so they
/// agree on case-insensitivity of the persisted form.
pub(crate) fn record_key(
    namespace: &str,
    event_stream_name: &str,
    consumer_group: &str,
    partition_id: &str,
) -> String {
    format!(
        "{}/{}/{}/{}",
        namespace.to_lowercase(),
        event_stream_name.to_lowercase(),
        consumer_group.to_lowercase(),
        partition_id.to_lowercase()
    )
}

pub(crate) fn validate_address(
    namespace: &str,
    event_stream_name: &str,
    consumer_group: &str,
    partition_id: &str,
) -> Result<()> {
    if namespace.is_empty() {
        return Err(StoreError::MissingField("fully_qualified_namespace"));
    }
    if event_stream_name.is_empty() {
        return Err(StoreError::MissingField("event_stream_name"));
    }
    if consumer_group.is_empty() {
        return Err(StoreError::MissingField("consumer_group"));
    }
    if partition_id.is_empty() {
        return Err(StoreError::MissingField("partition_id"));
    }
    Ok(())
}
