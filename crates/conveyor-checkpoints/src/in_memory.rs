//! In-memory checkpoint store.
//!
//! Process-local implementation of [`CheckpointStore`]. It exists for two
//! reasons: it is the reference for the store's concurrency semantics
//! (every conditional-write rule lives here in its simplest form), and it
//! is the backend the processor and load balancer tests run against -
//! shared across simulated "consumers" via `Arc`, the same way separate
//! processes share a blob container in production.

use crate::error::{Result, StoreError};
use crate::types::{Checkpoint, Ownership};
use crate::{record_key, validate_address, CheckpointStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory [`CheckpointStore`] implementation.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    ownerships: RwLock<HashMap<String, Ownership>>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn claim_ownership(&self, ownerships: Vec<Ownership>) -> Result<Vec<Ownership>> {
        let now = Self::now_ms();
        let mut claimed = Vec::new();
        let mut map = self.ownerships.write().await;

        for mut ownership in ownerships {
            validate_address(
                &ownership.fully_qualified_namespace,
                &ownership.event_stream_name,
                &ownership.consumer_group,
                &ownership.partition_id,
            )?;

            let key = record_key(
                &ownership.fully_qualified_namespace,
                &ownership.event_stream_name,
                &ownership.consumer_group,
                &ownership.partition_id,
            );

            // Claim succeeds iff the supplied token matches the stored one,
            // or neither side has a record/token yet.
            let wins = match (map.get(&key), ownership.etag.as_deref()) {
                (None, None) => true,
                (Some(current), Some(token)) => current.etag.as_deref() == Some(token),
                _ => false,
            };

            if !wins {
                debug!(
                    partition_id = %ownership.partition_id,
                    owner_id = %ownership.owner_id,
                    "ownership claim lost to a concurrent writer"
                );
                continue;
            }

            ownership.etag = Some(Uuid::new_v4().to_string());
            ownership.last_modified_ms = now;
            map.insert(key, ownership.clone());
            claimed.push(ownership);
        }

        Ok(claimed)
    }

    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>> {
        let prefix = format!(
            "{}/",
            record_key(
                fully_qualified_namespace,
                event_stream_name,
                consumer_group,
                ""
            )
            .trim_end_matches('/')
        );

        let map = self.ownerships.read().await;
        let mut out: Vec<Ownership> = map
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(out)
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        let prefix = format!(
            "{}/",
            record_key(
                fully_qualified_namespace,
                event_stream_name,
                consumer_group,
                ""
            )
            .trim_end_matches('/')
        );

        let map = self.checkpoints.read().await;
        let mut out: Vec<Checkpoint> = map
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(out)
    }

    async fn update_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        validate_address(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_stream_name,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        )?;

        if checkpoint.offset.is_none() && checkpoint.sequence_number.is_none() {
            return Err(StoreError::InvalidCheckpoint {
                partition_id: checkpoint.partition_id,
                field: "offset or sequence_number",
            });
        }

        let key = record_key(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_stream_name,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        );

        self.checkpoints.write().await.insert(key, checkpoint);
        Ok(())
    }
}
