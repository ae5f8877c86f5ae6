//! Partition load balancer.
//!
//! Pure decision component: given the full ownership snapshot for a stream
//! and this consumer's identity, compute which partitions to claim (or
//! re-claim) this round, then submit the whole batch through the store's
//! conditional-write primitive. Whatever survives the compare-and-swap
//! races is this round's ownership - there is no retry inside a round; the
//! next round re-reads the world and decides again.
//!
//! Fairness comes from the share computation (`ceil(partitions / owners)`)
//! and convergence comes from randomized candidate selection: consumers
//! that start simultaneously with identical snapshots must not all chase
//! the same partition, so each instance owns an independently seeded RNG.
//!
//! The owner count is derived from the owners visible in the snapshot plus
//! this consumer. A consumer that has not yet won any partition is
//! invisible to its peers until it does - an accepted trade-off of
//! coordinator-free balancing that only delays convergence, never breaks
//! mutual exclusion.

use crate::config::LoadBalancingStrategy;
use crate::error::Result;
use conveyor_checkpoints::{CheckpointStore, Ownership};
use conveyor_core::ConsumerIdentity;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Computes and submits this consumer's claims, one round at a time.
///
/// Not internally synchronized: the processor serializes rounds, so the
/// balancer takes `&mut self` and owns its RNG directly.
pub struct LoadBalancer {
    store: Arc<dyn CheckpointStore>,
    identity: ConsumerIdentity,
    strategy: LoadBalancingStrategy,
    partition_expiration: Duration,
    rng: StdRng,
}

/// Ownership snapshot bucketed relative to "now", rebuilt from scratch
/// every round.
struct OwnershipSnapshot {
    /// Unexpired records owned by this consumer.
    current: Vec<Ownership>,

    /// Partitions with no physical record (synthesized entries with no
    /// token) plus records whose owner let them expire.
    unowned_or_expired: Vec<Ownership>,

    /// Records of other owners holding strictly more than `max_allowed`.
    above_max: Vec<Ownership>,

    /// Fair share ceiling for this consumer.
    max_allowed: usize,

    /// Whether `partitions % owners != 0`, i.e. some owners get one more
    /// than the floor.
    extra_partition_possible: bool,
}

impl LoadBalancer {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        identity: ConsumerIdentity,
        strategy: LoadBalancingStrategy,
        partition_expiration: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            strategy,
            partition_expiration,
            rng: StdRng::from_entropy(),
        }
    }

    /// Run one balancing round and return the partitions this consumer now
    /// owns (previously-held re-affirmed plus newly won).
    pub async fn load_balance(&mut self, partition_ids: &[String]) -> Result<Vec<Ownership>> {
        let all = self
            .store
            .list_ownership(
                &self.identity.fully_qualified_namespace,
                &self.identity.event_stream_name,
                &self.identity.consumer_group,
            )
            .await?;

        let snapshot = self.snapshot(all, partition_ids);

        let claim_more = if snapshot.current.len() >= snapshot.max_allowed {
            false
        } else if snapshot.extra_partition_possible
            && snapshot.current.len() == snapshot.max_allowed - 1
        {
            // At the floor already; go for the remainder partition only if
            // one is actually free or stealable.
            !snapshot.unowned_or_expired.is_empty() || !snapshot.above_max.is_empty()
        } else {
            true
        };

        let mut candidates = snapshot.current.clone();

        if claim_more {
            match self.strategy {
                LoadBalancingStrategy::Balanced => {
                    let pick = snapshot
                        .unowned_or_expired
                        .choose(&mut self.rng)
                        .or_else(|| snapshot.above_max.choose(&mut self.rng));
                    if let Some(ownership) = pick {
                        candidates.push(ownership.clone());
                    }
                }
                LoadBalancingStrategy::Greedy => {
                    let deficit = snapshot.max_allowed.saturating_sub(candidates.len());
                    candidates.extend(
                        snapshot
                            .unowned_or_expired
                            .choose_multiple(&mut self.rng, deficit)
                            .cloned(),
                    );

                    if candidates.len() < snapshot.max_allowed {
                        let deficit = snapshot.max_allowed - candidates.len();
                        candidates.extend(
                            snapshot
                                .above_max
                                .choose_multiple(&mut self.rng, deficit)
                                .cloned(),
                        );
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Tokens stay exactly as observed so stale racers lose the CAS;
        // only the owner changes.
        for ownership in &mut candidates {
            ownership.owner_id = self.identity.client_id.clone();
        }

        let requested = candidates.len();
        let claimed = self.store.claim_ownership(candidates).await?;

        debug!(
            client_id = %self.identity.client_id,
            strategy = %self.strategy,
            requested,
            claimed = claimed.len(),
            max_allowed = snapshot.max_allowed,
            "balancing round complete"
        );

        Ok(claimed)
    }

    /// Jittered pause before the next round, `base * uniform[0.8, 1.3)`.
    pub fn next_round_delay(&mut self, base: Duration) -> Duration {
        base.mul_f64(self.rng.gen_range(0.8..1.3))
    }

    fn snapshot(&self, all: Vec<Ownership>, partition_ids: &[String]) -> OwnershipSnapshot {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let expiration_ms = self.partition_expiration.as_millis() as i64;

        let mut grouped: HashMap<String, Vec<Ownership>> = HashMap::new();
        // Seed ourselves so the owner count includes this consumer even
        // before it has won anything.
        grouped.insert(self.identity.client_id.clone(), Vec::new());

        let mut unowned_or_expired = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for ownership in all {
            seen.insert(ownership.partition_id.clone());

            let expired = now_ms - ownership.last_modified_ms >= expiration_ms;
            if expired || ownership.owner_id.is_empty() {
                unowned_or_expired.push(ownership);
            } else {
                grouped
                    .entry(ownership.owner_id.clone())
                    .or_default()
                    .push(ownership);
            }
        }

        // Partitions that have never been owned have no record at all.
        for partition_id in partition_ids {
            if !seen.contains(partition_id) {
                unowned_or_expired.push(Ownership {
                    fully_qualified_namespace: self.identity.fully_qualified_namespace.clone(),
                    event_stream_name: self.identity.event_stream_name.clone(),
                    consumer_group: self.identity.consumer_group.clone(),
                    partition_id: partition_id.clone(),
                    owner_id: String::new(),
                    last_modified_ms: 0,
                    etag: None,
                });
            }
        }

        let owners = grouped.len();
        let max_allowed = if partition_ids.len() % owners == 0 {
            partition_ids.len() / owners
        } else {
            partition_ids.len() / owners + 1
        };
        let extra_partition_possible = partition_ids.len() % owners != 0;

        let mut above_max = Vec::new();
        for (owner_id, ownerships) in &grouped {
            if owner_id != &self.identity.client_id && ownerships.len() > max_allowed {
                above_max.extend(ownerships.iter().cloned());
            }
        }

        let current = grouped
            .remove(&self.identity.client_id)
            .unwrap_or_default();

        OwnershipSnapshot {
            current,
            unowned_or_expired,
            above_max,
            max_allowed,
            extra_partition_possible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_checkpoints::InMemoryCheckpointStore;

    const NAMESPACE: &str = "ns.example.net";
    const STREAM: &str = "orders";
    const GROUP: &str = "$default";

    fn balancer(
        store: &Arc<InMemoryCheckpointStore>,
        client_id: &str,
        strategy: LoadBalancingStrategy,
        expiration: Duration,
    ) -> LoadBalancer {
        let identity =
            ConsumerIdentity::new(NAMESPACE, STREAM, GROUP).with_client_id(client_id);
        LoadBalancer::new(store.clone(), identity, strategy, expiration)
    }

    fn partitions(n: usize) -> Vec<String> {
        (0..n).map(|i| i.to_string()).collect()
    }

    async fn owned_by(store: &Arc<InMemoryCheckpointStore>, client_id: &str) -> Vec<String> {
        let mut owned: Vec<String> = store
            .list_ownership(NAMESPACE, STREAM, GROUP)
            .await
            .unwrap()
            .into_iter()
            .filter(|o| o.owner_id == client_id)
            .map(|o| o.partition_id)
            .collect();
        owned.sort();
        owned
    }

    /// Alternate rounds between two consumers until neither's owned count
    /// changes, as separate processes converge in production.
    async fn converge(
        store: &Arc<InMemoryCheckpointStore>,
        a: &mut LoadBalancer,
        b: &mut LoadBalancer,
        ids: &[String],
    ) {
        let mut previous = (usize::MAX, usize::MAX);
        for _ in 0..32 {
            a.load_balance(ids).await.unwrap();
            b.load_balance(ids).await.unwrap();
            let counts = (
                owned_by(store, "consumer-a").await.len(),
                owned_by(store, "consumer-b").await.len(),
            );
            if counts == previous {
                return;
            }
            previous = counts;
        }
        panic!("consumers did not converge within 32 rounds");
    }

    #[tokio::test]
    async fn test_greedy_single_consumer_takes_everything_in_one_round() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut lb = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );

        let claimed = lb.load_balance(&partitions(4)).await.unwrap();
        assert_eq!(claimed.len(), 4);
    }

    #[tokio::test]
    async fn test_balanced_claims_at_most_one_per_round() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let mut lb = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Balanced,
            Duration::from_secs(60),
        );
        let ids = partitions(4);

        for round in 1..=4 {
            let claimed = lb.load_balance(&ids).await.unwrap();
            assert_eq!(claimed.len(), round, "one new partition per round");
        }
    }

    #[tokio::test]
    async fn test_two_consumers_four_partitions_split_evenly() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(4);
        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Balanced,
            Duration::from_secs(60),
        );
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Balanced,
            Duration::from_secs(60),
        );

        converge(&store, &mut a, &mut b, &ids).await;

        let owned_a = owned_by(&store, "consumer-a").await;
        let owned_b = owned_by(&store, "consumer-b").await;
        assert_eq!(owned_a.len(), 2);
        assert_eq!(owned_b.len(), 2);

        let mut all: Vec<String> = owned_a.into_iter().chain(owned_b).collect();
        all.sort();
        assert_eq!(all, ids, "every partition owned exactly once");

        // Further rounds change nothing.
        a.load_balance(&ids).await.unwrap();
        b.load_balance(&ids).await.unwrap();
        assert_eq!(owned_by(&store, "consumer-a").await.len(), 2);
        assert_eq!(owned_by(&store, "consumer-b").await.len(), 2);
    }

    #[tokio::test]
    async fn test_two_consumers_five_partitions_split_three_two() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(5);
        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );

        converge(&store, &mut a, &mut b, &ids).await;

        let owned_a = owned_by(&store, "consumer-a").await;
        let owned_b = owned_by(&store, "consumer-b").await;
        let mut counts = [owned_a.len(), owned_b.len()];
        counts.sort();
        assert_eq!(counts, [2, 3]);

        let mut all: Vec<String> = owned_a.into_iter().chain(owned_b).collect();
        all.sort();
        assert_eq!(all, ids, "no overlap, no gaps");
    }

    #[tokio::test]
    async fn test_expired_ownership_is_reclaimable_with_observed_token() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(1);

        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_millis(5),
        );
        a.load_balance(&ids).await.unwrap();
        assert_eq!(owned_by(&store, "consumer-a").await.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        // The record still physically exists under consumer-a, but it has
        // expired: consumer-b claims it through the normal CAS using the
        // token it observed - the store never special-cases expiry.
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Greedy,
            Duration::from_millis(5),
        );
        let claimed = b.load_balance(&ids).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(owned_by(&store, "consumer-b").await.len(), 1);
        assert!(owned_by(&store, "consumer-a").await.is_empty());
    }

    #[tokio::test]
    async fn test_greedy_newcomer_steals_from_above_max_owner() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(4);

        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        a.load_balance(&ids).await.unwrap();
        assert_eq!(owned_by(&store, "consumer-a").await.len(), 4);

        // consumer-b sees owners {a, b}, max_allowed 2, nothing unowned,
        // and all four of a's records above max - it takes two of them.
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        let claimed = b.load_balance(&ids).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(owned_by(&store, "consumer-b").await.len(), 2);
        assert_eq!(owned_by(&store, "consumer-a").await.len(), 2);
    }

    #[tokio::test]
    async fn test_at_floor_with_nothing_available_claims_nothing_new() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(3);

        // consumer-a grabs all three, then consumer-b steals two of them:
        // with 3 partitions / 2 owners, max_allowed is 2 with a remainder,
        // which leaves consumer-a sitting at the floor of 1.
        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        converge(&store, &mut a, &mut b, &ids).await;

        let before_a = owned_by(&store, "consumer-a").await;
        let before_b = owned_by(&store, "consumer-b").await;
        assert_eq!(before_a.len(), 1);
        assert_eq!(before_b.len(), 2);

        // Nothing is free and nobody is above max: the floor-sitter only
        // re-affirms what it already has.
        let reclaimed = a.load_balance(&ids).await.unwrap();
        let mut reclaimed_ids: Vec<String> =
            reclaimed.into_iter().map(|o| o.partition_id).collect();
        reclaimed_ids.sort();
        assert_eq!(reclaimed_ids, before_a);
        assert_eq!(owned_by(&store, "consumer-b").await, before_b);
    }

    #[tokio::test]
    async fn test_zero_partition_consumer_is_invisible_until_it_wins() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(4);

        let mut a = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        let mut b = balancer(
            &store,
            "consumer-b",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        converge(&store, &mut a, &mut b, &ids).await;

        // consumer-c observes three owners, so max_allowed is 2 - but a and
        // b hold exactly 2 each (not above max) and nothing is unowned, so
        // c cannot claim anything until an owner expires or leaves.
        let mut c = balancer(
            &store,
            "consumer-c",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );
        let claimed = c.load_balance(&ids).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_reaffirm_refreshes_existing_ownership() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ids = partitions(2);
        let mut lb = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Greedy,
            Duration::from_secs(60),
        );

        let first = lb.load_balance(&ids).await.unwrap();
        let second = lb.load_balance(&ids).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2, "re-claim of held partitions always succeeds");
        // Tokens rotate on every successful re-claim.
        for ownership in &second {
            let old = first
                .iter()
                .find(|o| o.partition_id == ownership.partition_id)
                .unwrap();
            assert_ne!(ownership.etag, old.etag);
        }
    }

    #[test]
    fn test_next_round_delay_stays_in_jitter_band() {
        let store: Arc<InMemoryCheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let mut lb = balancer(
            &store,
            "consumer-a",
            LoadBalancingStrategy::Balanced,
            Duration::from_secs(60),
        );

        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let delay = lb.next_round_delay(base);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay < Duration::from_secs(13));
        }
    }
}
