//! Conveyor Processor
//!
//! Load-balancing, checkpoint-resuming consumer for partitioned event
//! streams. Multiple processor instances - separate processes or machines
//! with no network path between them - divide a stream's partitions among
//! themselves using nothing but conditional writes to a shared
//! [checkpoint store](conveyor_checkpoints::CheckpointStore): no locks, no
//! consensus service, no coordinator.
//!
//! ## How coordination works
//!
//! Each instance periodically runs a balancing round:
//!
//! 1. Read every ownership record for the stream
//! 2. Bucket them: ours, unowned-or-expired, and owned-by-others (noting
//!    who holds more than the fair share `ceil(partitions / owners)`)
//! 3. Pick candidates at random - one per round (balanced) or up to the
//!    fair share (greedy)
//! 4. Submit the claims conditionally; whatever survives the races is this
//!    round's ownership
//!
//! Ownership is never released explicitly. A stopped or crashed consumer's
//! records simply expire, at which point any other instance claims them.
//! Checkpoints survive those handoffs, so the next owner resumes strictly
//! after the last checkpointed event - an at-least-once contract: events
//! processed but not yet checkpointed are redelivered.
//!
//! ## Usage
//!
//! ```ignore
//! use conveyor_processor::{Processor, ProcessorOptions, LoadBalancingStrategy};
//! use conveyor_core::ConsumerIdentity;
//! use tokio::sync::watch;
//!
//! let identity = ConsumerIdentity::new("ns.example.net", "orders", "$Default");
//! let processor = std::sync::Arc::new(Processor::new(
//!     stream_client,
//!     checkpoint_store,
//!     identity,
//!     ProcessorOptions::default().with_strategy(LoadBalancingStrategy::Greedy),
//! )?);
//!
//! let (stop, stop_rx) = watch::channel(false);
//! let run = tokio::spawn({
//!     let processor = processor.clone();
//!     async move { processor.run(stop_rx).await }
//! });
//!
//! while let Some(client) = processor.next_partition_client().await {
//!     tokio::spawn(async move {
//!         loop {
//!             let events = match client.receive_events(100, timeout).await {
//!                 Ok(events) => events,
//!                 Err(e) if e.is_ownership_lost() => break,
//!                 Err(e) => return Err(e),
//!             };
//!             for event in &events {
//!                 handle(event);
//!             }
//!             if let Some(last) = events.last() {
//!                 client.update_checkpoint(last).await?;
//!             }
//!         }
//!     });
//! }
//! ```

pub mod config;
pub mod error;
pub mod load_balancer;
pub mod partition_client;
pub mod processor;
pub mod transport;

pub use config::{LoadBalancingStrategy, ProcessorOptions};
pub use error::{ProcessorError, Result};
pub use load_balancer::LoadBalancer;
pub use partition_client::ProcessorPartitionClient;
pub use processor::Processor;
pub use transport::{PartitionReceiver, StreamClient};
