//! Blob-backed checkpoint store.
//!
//! Maps ownership and checkpoint records onto blobs in any
//! `object_store::ObjectStore` backend:
//!
//! ```text
//! {namespace}/{stream}/{consumer_group}/ownership/{partition_id}
//! {namespace}/{stream}/{consumer_group}/checkpoint/{partition_id}
//! ```
//!
//! Every path component is lowercased before the path is built. The blob's
//! ETag is the ownership version token: a claim that carries a token issues
//! a conditional put requiring an exact ETag match, and a claim without one
//! issues a create-if-absent. Either kind of rejection is a lost race, not
//! an error. Record data rides in blob metadata attributes - `ownerid` on
//! ownership blobs, `offset`/`sequencenumber` (decimal strings) on
//! checkpoint blobs - with an empty body.
//!
//! ## Legacy mixed-case names
//!
//! An earlier release built paths without lowercasing, so long-lived
//! containers can hold mixed-case blobs. When the caller's address
//! components are not already lowercase, listing also scans the as-given
//! prefix and surfaces those records under the canonical identity but with
//! no version token - which routes any follow-up claim through the
//! create-if-absent path against the canonical name instead of a
//! conditional update against the legacy one. After a successful write to
//! the canonical path the legacy blob is deleted best-effort; a failed
//! delete is ignored and retried by whichever write succeeds next. Two
//! consumers migrating the same record race on the create, and exactly one
//! wins - ordinary claim contention.

use crate::error::{Result, StoreError};
use crate::types::{Checkpoint, Ownership};
use crate::{validate_address, CheckpointStore};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectMeta, ObjectStore, PutMode,
    PutOptions, PutPayload, UpdateVersion,
};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const OWNERSHIP_SEGMENT: &str = "ownership";
const CHECKPOINT_SEGMENT: &str = "checkpoint";

const OWNER_ID_FIELD: &str = "ownerid";
const OFFSET_FIELD: &str = "offset";
const SEQUENCE_NUMBER_FIELD: &str = "sequencenumber";

/// Blob-backed [`CheckpointStore`] implementation.
pub struct BlobCheckpointStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobCheckpointStore {
    /// Create a store over an existing object store client. The backing
    /// container/bucket must already exist.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn canonical_prefix(namespace: &str, stream: &str, consumer_group: &str, kind: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            namespace.to_lowercase(),
            stream.to_lowercase(),
            consumer_group.to_lowercase(),
            kind
        )
    }

    fn legacy_prefix(namespace: &str, stream: &str, consumer_group: &str, kind: &str) -> String {
        format!("{}/{}/{}/{}", namespace, stream, consumer_group, kind)
    }

    fn canonical_blob_path(
        namespace: &str,
        stream: &str,
        consumer_group: &str,
        kind: &str,
        partition_id: &str,
    ) -> Path {
        Path::from(format!(
            "{}/{}",
            Self::canonical_prefix(namespace, stream, consumer_group, kind),
            partition_id.to_lowercase()
        ))
    }

    fn legacy_blob_path(
        namespace: &str,
        stream: &str,
        consumer_group: &str,
        kind: &str,
        partition_id: &str,
    ) -> Path {
        Path::from(format!(
            "{}/{}",
            Self::legacy_prefix(namespace, stream, consumer_group, kind),
            partition_id
        ))
    }

    /// List one prefix, keeping the trailing path segment as partition id.
    async fn list_blobs(&self, prefix: &str) -> Result<Vec<(String, ObjectMeta)>> {
        let prefix = Path::from(prefix.to_string());
        let metas: Vec<ObjectMeta> = self.store.list(Some(&prefix)).try_collect().await?;

        Ok(metas
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.filename().map(|name| name.to_string());
                name.map(|name| (name, meta))
            })
            .collect())
    }

    /// Fetch a blob's attributes, tolerating a concurrent delete.
    async fn get_attributes(&self, location: &Path) -> Result<Option<(Attributes, ObjectMeta)>> {
        match self.store.get_opts(location, GetOptions::default()).await {
            Ok(result) => {
                let attributes = result.attributes.clone();
                Ok(Some((attributes, result.meta)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Candidates for one record kind from the canonical prefix plus, when
    /// the caller's casing differs, the legacy prefix. A candidate is
    /// canonical iff it already lives at its lowercase path; canonical
    /// entries win collisions, and legacy survivors carry no version token.
    async fn list_candidates(
        &self,
        namespace: &str,
        stream: &str,
        consumer_group: &str,
        kind: &str,
    ) -> Result<Vec<BlobRecord>> {
        let canonical_prefix = Self::canonical_prefix(namespace, stream, consumer_group, kind);
        let legacy_prefix = Self::legacy_prefix(namespace, stream, consumer_group, kind);

        let mut raw = self.list_blobs(&canonical_prefix).await?;
        if legacy_prefix != canonical_prefix {
            raw.extend(self.list_blobs(&legacy_prefix).await?);
        }

        let mut records: BTreeMap<String, BlobRecord> = BTreeMap::new();

        // Canonical blobs first so they always shadow legacy ones.
        raw.sort_by_key(|(name, meta)| {
            let canonical = meta.location
                == Self::canonical_blob_path(namespace, stream, consumer_group, kind, name);
            !canonical
        });

        for (name, meta) in raw {
            let canonical = meta.location
                == Self::canonical_blob_path(namespace, stream, consumer_group, kind, &name);
            let partition_id = name.to_lowercase();

            if records.contains_key(&partition_id) {
                continue;
            }

            let Some((attributes, fetched)) = self.get_attributes(&meta.location).await? else {
                // Deleted between list and fetch; treat as never listed.
                continue;
            };

            let etag = if canonical { fetched.e_tag.clone() } else { None };
            records.insert(
                partition_id.clone(),
                BlobRecord {
                    partition_id,
                    location: meta.location,
                    attributes,
                    last_modified_ms: fetched.last_modified.timestamp_millis(),
                    etag,
                },
            );
        }

        Ok(records.into_values().collect())
    }

    /// Best-effort removal of a superseded legacy blob. Failure here is not
    /// a correctness problem: the next successful write retries it.
    async fn delete_superseded_blob(&self, canonical: &Path, legacy: &Path) {
        if legacy == canonical {
            return;
        }
        match self.store.delete(legacy).await {
            Ok(()) => debug!(blob = %legacy, "removed legacy mixed-case blob"),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => {
                debug!(blob = %legacy, error = %e, "legacy blob cleanup failed; leaving for a later write")
            }
        }
    }
}

/// One listed blob with its decoded metadata, before interpretation as an
/// ownership or checkpoint record.
struct BlobRecord {
    partition_id: String,
    location: Path,
    attributes: Attributes,
    last_modified_ms: i64,
    etag: Option<String>,
}

fn metadata_field<'a>(attributes: &'a Attributes, name: &'static str) -> Option<&'a str> {
    attributes
        .get(&Attribute::Metadata(Cow::Borrowed(name)))
        .map(|value| &**value)
}

fn numeric_field(
    attributes: &Attributes,
    name: &'static str,
    location: &Path,
) -> Result<Option<i64>> {
    match metadata_field(attributes, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| StoreError::MalformedMetadata {
                field: name,
                path: location.to_string(),
                value: raw.to_string(),
            }),
    }
}

#[async_trait]
impl CheckpointStore for BlobCheckpointStore {
    async fn claim_ownership(&self, ownerships: Vec<Ownership>) -> Result<Vec<Ownership>> {
        let mut claimed = Vec::new();

        for mut ownership in ownerships {
            validate_address(
                &ownership.fully_qualified_namespace,
                &ownership.event_stream_name,
                &ownership.consumer_group,
                &ownership.partition_id,
            )?;

            let canonical = Self::canonical_blob_path(
                &ownership.fully_qualified_namespace,
                &ownership.event_stream_name,
                &ownership.consumer_group,
                OWNERSHIP_SEGMENT,
                &ownership.partition_id,
            );

            let mut attributes = Attributes::new();
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(OWNER_ID_FIELD)),
                AttributeValue::from(ownership.owner_id.clone()),
            );

            // A token means "replace exactly the version I observed"; no
            // token means "there must be no blob yet".
            let mode = match &ownership.etag {
                Some(etag) => PutMode::Update(UpdateVersion {
                    e_tag: Some(etag.clone()),
                    version: None,
                }),
                None => PutMode::Create,
            };

            let outcome = self
                .store
                .put_opts(
                    &canonical,
                    PutPayload::default(),
                    PutOptions {
                        mode,
                        attributes,
                        ..Default::default()
                    },
                )
                .await;

            match outcome {
                Ok(result) => {
                    ownership.etag = result.e_tag;
                    ownership.last_modified_ms = chrono::Utc::now().timestamp_millis();

                    let legacy = Self::legacy_blob_path(
                        &ownership.fully_qualified_namespace,
                        &ownership.event_stream_name,
                        &ownership.consumer_group,
                        OWNERSHIP_SEGMENT,
                        &ownership.partition_id,
                    );
                    self.delete_superseded_blob(&canonical, &legacy).await;

                    claimed.push(ownership);
                }
                Err(
                    object_store::Error::Precondition { .. }
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::NotFound { .. },
                ) => {
                    debug!(
                        partition_id = %ownership.partition_id,
                        owner_id = %ownership.owner_id,
                        "ownership claim lost to a concurrent writer"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(claimed)
    }

    async fn list_ownership(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Ownership>> {
        let records = self
            .list_candidates(
                fully_qualified_namespace,
                event_stream_name,
                consumer_group,
                OWNERSHIP_SEGMENT,
            )
            .await?;

        Ok(records
            .into_iter()
            .map(|record| Ownership {
                fully_qualified_namespace: fully_qualified_namespace.to_lowercase(),
                event_stream_name: event_stream_name.to_lowercase(),
                consumer_group: consumer_group.to_lowercase(),
                owner_id: metadata_field(&record.attributes, OWNER_ID_FIELD)
                    .unwrap_or_default()
                    .to_string(),
                partition_id: record.partition_id,
                last_modified_ms: record.last_modified_ms,
                etag: record.etag,
            })
            .collect())
    }

    async fn list_checkpoints(
        &self,
        fully_qualified_namespace: &str,
        event_stream_name: &str,
        consumer_group: &str,
    ) -> Result<Vec<Checkpoint>> {
        let records = self
            .list_candidates(
                fully_qualified_namespace,
                event_stream_name,
                consumer_group,
                CHECKPOINT_SEGMENT,
            )
            .await?;

        let mut checkpoints = Vec::with_capacity(records.len());
        for record in records {
            let offset = numeric_field(&record.attributes, OFFSET_FIELD, &record.location)?;
            let sequence_number =
                numeric_field(&record.attributes, SEQUENCE_NUMBER_FIELD, &record.location)?;

            checkpoints.push(Checkpoint {
                fully_qualified_namespace: fully_qualified_namespace.to_lowercase(),
                event_stream_name: event_stream_name.to_lowercase(),
                consumer_group: consumer_group.to_lowercase(),
                partition_id: record.partition_id,
                offset,
                sequence_number,
            });
        }

        Ok(checkpoints)
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

        let mut attributes = Attributes::new();
        if let Some(offset) = checkpoint.offset {
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(OFFSET_FIELD)),
                AttributeValue::from(offset.to_string()),
            );
        }
        if let Some(sequence_number) = checkpoint.sequence_number {
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(SEQUENCE_NUMBER_FIELD)),
                AttributeValue::from(sequence_number.to_string()),
            );
        }

        let canonical = Self::canonical_blob_path(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_stream_name,
            &checkpoint.consumer_group,
            CHECKPOINT_SEGMENT,
            &checkpoint.partition_id,
        );

        self.store
            .put_opts(
                &canonical,
                PutPayload::default(),
                PutOptions {
                    mode: PutMode::Overwrite,
                    attributes,
                    ..Default::default()
                },
            )
            .await?;

        let legacy = Self::legacy_blob_path(
            &checkpoint.fully_qualified_namespace,
            &checkpoint.event_stream_name,
            &checkpoint.consumer_group,
            CHECKPOINT_SEGMENT,
            &checkpoint.partition_id,
        );
        self.delete_superseded_blob(&canonical, &legacy).await;

        Ok(())
    }
}
