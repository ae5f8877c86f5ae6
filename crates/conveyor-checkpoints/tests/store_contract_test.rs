//! Contract tests run against every store implementation.
//!
//! The processor only ever sees `Arc<dyn CheckpointStore>`, so the two
//! backends must agree on the conditional-write semantics exactly. Each
//! test here runs the same scenario against both.

use conveyor_checkpoints::{
    BlobCheckpointStore, Checkpoint, CheckpointStore, InMemoryCheckpointStore, Ownership,
};
use object_store::memory::InMemory;
use std::collections::HashMap;
use std::sync::Arc;

const NAMESPACE: &str = "ns.example.net";
const STREAM: &str = "orders";
const GROUP: &str = "$default";

fn stores() -> Vec<(&'static str, Arc<dyn CheckpointStore>)> {
    vec![
        ("in-memory", Arc::new(InMemoryCheckpointStore::new())),
        (
            "blob",
            Arc::new(BlobCheckpointStore::new(Arc::new(InMemory::new()))),
        ),
    ]
}

fn ownership(partition_id: &str, owner_id: &str) -> Ownership {
    Ownership {
        fully_qualified_namespace: NAMESPACE.to_string(),
        event_stream_name: STREAM.to_string(),
        consumer_group: GROUP.to_string(),
        partition_id: partition_id.to_string(),
        owner_id: owner_id.to_string(),
        last_modified_ms: 0,
        etag: None,
    }
}

fn checkpoint(partition_id: &str, offset: i64, sequence_number: i64) -> Checkpoint {
    Checkpoint {
        fully_qualified_namespace: NAMESPACE.to_string(),
        event_stream_name: STREAM.to_string(),
        consumer_group: GROUP.to_string(),
        partition_id: partition_id.to_string(),
        offset: Some(offset),
        sequence_number: Some(sequence_number),
    }
}

#[tokio::test]
async fn test_claim_list_reclaim_contract() {
    for (name, store) in stores() {
        // First claim creates the record.
        let first = store
            .claim_ownership(vec![ownership("0", "consumer-a")])
            .await
            .unwrap();
        assert_eq!(first.len(), 1, "[{name}] first claim must win");
        assert!(first[0].etag.is_some(), "[{name}] claim must mint a token");

        // Re-claim with the current token wins and rotates the token.
        let second = store.claim_ownership(first.clone()).await.unwrap();
        assert_eq!(second.len(), 1, "[{name}] idempotent re-claim must win");
        assert_ne!(second[0].etag, first[0].etag, "[{name}] token must rotate");

        // A claim with the stale token loses silently.
        let mut stale = ownership("0", "consumer-b");
        stale.etag = first[0].etag.clone();
        let lost = store.claim_ownership(vec![stale]).await.unwrap();
        assert!(lost.is_empty(), "[{name}] stale token must lose");

        // The listing still shows the original owner.
        let listed = store
            .list_ownership(NAMESPACE, STREAM, GROUP)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1, "[{name}]");
        assert_eq!(listed[0].owner_id, "consumer-a", "[{name}]");
        assert_eq!(listed[0].etag, second[0].etag, "[{name}]");
        assert!(listed[0].last_modified_ms > 0, "[{name}]");
    }
}

#[tokio::test]
async fn test_claim_storm_has_exactly_one_winner() {
    for (name, store) in stores() {
        let seeded = store
            .claim_ownership(vec![ownership("0", "seed")])
            .await
            .unwrap();
        let etag = seeded[0].etag.clone();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let etag = etag.clone();
            handles.push(tokio::spawn(async move {
                let mut attempt = ownership("0", &format!("consumer-{i}"));
                attempt.etag = etag;
                store.claim_ownership(vec![attempt]).await.unwrap().len()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            winners += handle.await.unwrap();
        }
        assert_eq!(winners, 1, "[{name}] exactly one racer may win the claim");
    }
}

#[tokio::test]
async fn test_checkpoints_survive_ownership_transfer() {
    for (name, store) in stores() {
        // consumer-a owns partition 0 and checkpoints at sequence 202.
        let claimed = store
            .claim_ownership(vec![ownership("0", "consumer-a")])
            .await
            .unwrap();
        store.update_checkpoint(checkpoint("0", 101, 202)).await.unwrap();

        // consumer-b takes the partition over.
        let mut takeover = claimed.into_iter().next().unwrap();
        takeover.owner_id = "consumer-b".to_string();
        let claimed = store.claim_ownership(vec![takeover]).await.unwrap();
        assert_eq!(claimed.len(), 1, "[{name}]");

        // The checkpoint is untouched by the transfer.
        let checkpoints = store
            .list_checkpoints(NAMESPACE, STREAM, GROUP)
            .await
            .unwrap();
        assert_eq!(checkpoints.len(), 1, "[{name}]");
        assert_eq!(checkpoints[0].offset, Some(101), "[{name}]");
        assert_eq!(checkpoints[0].sequence_number, Some(202), "[{name}]");
    }
}

#[tokio::test]
async fn test_batch_claims_are_independent() {
    for (name, store) in stores() {
        // Seed three partitions under consumer-a.
        let seeded = store
            .claim_ownership(vec![
                ownership("0", "consumer-a"),
                ownership("1", "consumer-a"),
                ownership("2", "consumer-a"),
            ])
            .await
            .unwrap();
        assert_eq!(seeded.len(), 3, "[{name}]");

        // Rotate partition 1's token behind consumer-b's back.
        let rotate = seeded
            .iter()
            .find(|o| o.partition_id == "1")
            .cloned()
            .unwrap();
        store.claim_ownership(vec![rotate]).await.unwrap();

        // consumer-b submits all three with the tokens it observed before
        // the rotation: 0 and 2 succeed, 1 is dropped.
        let attempts: Vec<Ownership> = seeded
            .into_iter()
            .map(|mut o| {
                o.owner_id = "consumer-b".to_string();
                o
            })
            .collect();
        let claimed = store.claim_ownership(attempts).await.unwrap();

        let mut won: Vec<String> = claimed.into_iter().map(|o| o.partition_id).collect();
        won.sort();
        assert_eq!(won, ["0", "2"], "[{name}] partial success is per-entry");

        let listed = store
            .list_ownership(NAMESPACE, STREAM, GROUP)
            .await
            .unwrap();
        let owners: HashMap<String, String> = listed
            .into_iter()
            .map(|o| (o.partition_id, o.owner_id))
            .collect();
        assert_eq!(owners["0"], "consumer-b", "[{name}]");
        assert_eq!(owners["1"], "consumer-a", "[{name}]");
        assert_eq!(owners["2"], "consumer-b", "[{name}]");
    }
}
