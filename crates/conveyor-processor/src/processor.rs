//! Processor orchestration loop.
//!
//! ## What Does This Do?
//!
//! One `Processor` instance is one member of a consumer group. Its `run`
//! loop periodically asks the [`LoadBalancer`] which partitions this
//! instance should own, turns newly-won ownerships into live partition
//! receivers, and hands those to the caller through
//! [`next_partition_client`](Processor::next_partition_client). Receivers
//! are torn down when ownership moves elsewhere (the transport surfaces
//! ownership-lost) or when the processor shuts down.
//!
//! Multiple instances - typically separate processes or machines - run the
//! same loop against the same checkpoint store with no other coordination.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──run()──▶ Initializing ──▶ Active ──shutdown──▶ Stopped
//!                 (fetch stream     (dispatch loop,      (receivers closed,
//!                  properties)       jittered interval)   permanently dead)
//! ```
//!
//! `run` can be called once, ever: a second concurrent call and any call
//! after stopping are both rejected. Callers blocked in
//! `next_partition_client` are released when the processor first becomes
//! active, and get `None` once it stops.
//!
//! ## Failure semantics
//!
//! A failure to open one partition's receiver is absorbed: the partition is
//! untracked again and a later round retries it. A checkpoint store
//! failure aborts the round and terminates `run` - a coordination-layer
//! outage cannot be worked around locally.

use crate::config::ProcessorOptions;
use crate::error::{ProcessorError, Result};
use crate::load_balancer::LoadBalancer;
use crate::partition_client::{ActiveClients, ProcessorPartitionClient, TrackedClient};
use crate::transport::StreamClient;
use conveyor_checkpoints::{Checkpoint, CheckpointStore, Ownership};
use conveyor_core::{ConsumerIdentity, StartPosition, StartPositions};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorState {
    Idle,
    Running,
    Stopped,
}

/// Load-balancing event processor. See the module docs for the model.
pub struct Processor {
    stream_client: Arc<dyn StreamClient>,
    store: Arc<dyn CheckpointStore>,
    identity: ConsumerIdentity,
    options: ProcessorOptions,

    state: Mutex<ProcessorState>,
    load_balancer: Mutex<LoadBalancer>,
    active: Arc<ActiveClients>,

    // Flips to true once the processor reaches Active (or fails trying, so
    // waiters never hang on a dead instance).
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,

    // Created during run() once the partition count is known; capacity is
    // the partition count so publishing a claimed partition never blocks in
    // correct operation.
    clients: OnceCell<Mutex<mpsc::Receiver<Arc<ProcessorPartitionClient>>>>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("identity", &self.identity)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Processor {
    pub fn new(
        stream_client: Arc<dyn StreamClient>,
        store: Arc<dyn CheckpointStore>,
        identity: ConsumerIdentity,
        options: ProcessorOptions,
    ) -> Result<Self> {
        if identity.fully_qualified_namespace.is_empty()
            || identity.event_stream_name.is_empty()
            || identity.consumer_group.is_empty()
            || identity.client_id.is_empty()
        {
            return Err(ProcessorError::InvalidConfig(
                "consumer identity fields must all be non-empty".to_string(),
            ));
        }
        if options.update_interval.is_zero() {
            return Err(ProcessorError::InvalidConfig(
                "update_interval must be non-zero".to_string(),
            ));
        }
        if options.partition_expiration.is_zero() {
            return Err(ProcessorError::InvalidConfig(
                "partition_expiration must be non-zero".to_string(),
            ));
        }

        let load_balancer = LoadBalancer::new(
            store.clone(),
            identity.clone(),
            options.strategy,
            options.partition_expiration,
        );
        let (ready_tx, ready_rx) = watch::channel(false);

        Ok(Self {
            stream_client,
            store,
            identity,
            options,
            state: Mutex::new(ProcessorState::Idle),
            load_balancer: Mutex::new(load_balancer),
            active: Arc::new(RwLock::new(HashMap::new())),
            ready_tx,
            ready_rx,
            clients: OnceCell::new(),
        })
    }

    /// Run the balancing loop until `shutdown` carries `true` (or its
    /// sender is dropped). In-flight dispatch work finishes before the loop
    /// exits; all live partition clients are closed on the way out.
    ///
    /// One call per instance: concurrent calls fail with `AlreadyRunning`,
    /// and calls after the first run completes fail with `Stopped`.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.begin_run().await?;
        let result = self.run_loop(shutdown).await;
        self.teardown().await;
        result
    }

    /// Wait for the next partition this processor acquires.
    ///
    /// Blocks until the processor has become active at least once, then
    /// until a partition is claimed. Returns `None` once the processor has
    /// stopped and the queue has drained. Safe to call from several tasks;
    /// each client is delivered exactly once.
    pub async fn next_partition_client(&self) -> Option<Arc<ProcessorPartitionClient>> {
        let mut ready = self.ready_rx.clone();
        loop {
            if *ready.borrow_and_update() {
                break;
            }
            if ready.changed().await.is_err() {
                break;
            }
        }

        let clients = self.clients.get()?;
        clients.lock().await.recv().await
    }

    async fn begin_run(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            ProcessorState::Idle => {
                *state = ProcessorState::Running;
                Ok(())
            }
            ProcessorState::Running => Err(ProcessorError::AlreadyRunning),
            ProcessorState::Stopped => Err(ProcessorError::Stopped),
        }
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let properties = self.stream_client.properties().await?;
        let capacity = properties.partition_ids.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);

        // First (and only) run: publish the receiving end and unblock
        // next_partition_client waiters.
        let _ = self.clients.set(Mutex::new(rx));
        let _ = self.ready_tx.send(true);

        info!(
            client_id = %self.identity.client_id,
            partitions = properties.partition_ids.len(),
            strategy = %self.options.strategy,
            "processor active"
        );

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            self.dispatch(&properties.partition_ids, &tx).await?;

            let delay = {
                let mut balancer = self.load_balancer.lock().await;
                balancer.next_round_delay(self.options.update_interval)
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
            }
        }
    }

    /// One balancing round: claim, read checkpoints once, then fan out
    /// receiver creation for every newly-held partition and wait for all of
    /// it (bounding the round by the slowest single open, not the sum).
    async fn dispatch(
        &self,
        partition_ids: &[String],
        tx: &mpsc::Sender<Arc<ProcessorPartitionClient>>,
    ) -> Result<()> {
        let ownerships = {
            let mut balancer = self.load_balancer.lock().await;
            balancer.load_balance(partition_ids).await?
        };

        if ownerships.is_empty() {
            return Ok(());
        }

        let checkpoints: HashMap<String, Checkpoint> = self
            .store
            .list_checkpoints(
                &self.identity.fully_qualified_namespace,
                &self.identity.event_stream_name,
                &self.identity.consumer_group,
            )
            .await?
            .into_iter()
            .map(|checkpoint| (checkpoint.partition_id.clone(), checkpoint))
            .collect();

        let creations = ownerships
            .into_iter()
            .map(|ownership| self.add_partition_client(ownership, &checkpoints, tx));
        join_all(creations).await;

        Ok(())
    }

    /// Wire up a receiver for one owned partition, unless one is already
    /// live. Failures are absorbed: the tracking entry is released so a
    /// later round retries the partition.
    async fn add_partition_client(
        &self,
        ownership: Ownership,
        checkpoints: &HashMap<String, Checkpoint>,
        tx: &mpsc::Sender<Arc<ProcessorPartitionClient>>,
    ) {
        let partition_id = ownership.partition_id;

        {
            let mut active = self.active.write().await;
            if active.contains_key(&partition_id) {
                return;
            }
            active.insert(partition_id.clone(), TrackedClient::Pending);
        }

        let start_position =
            start_position_for(&partition_id, checkpoints, &self.options.start_positions);

        debug!(
            partition_id = %partition_id,
            start_position = ?start_position,
            "opening partition receiver"
        );

        // Open eagerly: a claim should manifest as a live link immediately,
        // keeping the claimed-but-not-consuming window as small as possible.
        match self
            .stream_client
            .open_receiver(&partition_id, start_position, Some(0))
            .await
        {
            Ok(receiver) => {
                let client = Arc::new(ProcessorPartitionClient::new(
                    self.identity.fully_qualified_namespace.clone(),
                    self.identity.event_stream_name.clone(),
                    self.identity.consumer_group.clone(),
                    partition_id.clone(),
                    receiver,
                    self.store.clone(),
                    Arc::downgrade(&self.active),
                ));

                self.active
                    .write()
                    .await
                    .insert(partition_id.clone(), TrackedClient::Ready(client.clone()));

                info!(partition_id = %partition_id, "partition acquired");

                if tx.send(client.clone()).await.is_err() {
                    // Shut down between claim and publish; untrack and close
                    // so nothing leaks.
                    let _ = client.close().await;
                }
            }
            Err(e) => {
                warn!(
                    partition_id = %partition_id,
                    error = %e,
                    "failed to open partition receiver; retrying on a later round"
                );
                self.active.write().await.remove(&partition_id);
            }
        }
    }

    async fn teardown(&self) {
        let clients: Vec<Arc<ProcessorPartitionClient>> = {
            let mut active = self.active.write().await;
            active
                .drain()
                .filter_map(|(_, entry)| match entry {
                    TrackedClient::Ready(client) => Some(client),
                    TrackedClient::Pending => None,
                })
                .collect()
        };

        for client in clients {
            if let Err(e) = client.close().await {
                debug!(
                    partition_id = %client.partition_id(),
                    error = %e,
                    "error closing partition client during shutdown"
                );
            }
        }

        *self.state.lock().await = ProcessorState::Stopped;

        // If run() failed before reaching Active, waiters are still parked
        // on the ready signal; release them so they observe the stop.
        let _ = self.ready_tx.send(true);

        info!(client_id = %self.identity.client_id, "processor stopped");
    }
}

/// Checkpoint wins over configured positions; sequence number wins over
/// offset. Both resume strictly after the recorded event.
fn start_position_for(
    partition_id: &str,
    checkpoints: &HashMap<String, Checkpoint>,
    configured: &StartPositions,
) -> StartPosition {
    if let Some(checkpoint) = checkpoints.get(partition_id) {
        if let Some(sequence_number) = checkpoint.sequence_number {
            return StartPosition::SequenceNumber(sequence_number);
        }
        if let Some(offset) = checkpoint.offset {
            return StartPosition::Offset(offset);
        }
    }

    configured
        .per_partition
        .get(partition_id)
        .copied()
        .unwrap_or(configured.default)
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
