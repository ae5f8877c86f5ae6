//! Two processors in one process dividing a stream's partitions.
//!
//! Both instances coordinate purely through the shared checkpoint store,
//! exactly as separate processes would through a shared blob container.
//!
//! Run with: cargo run -p conveyor-processor --example load_balancing

use async_trait::async_trait;
use conveyor_checkpoints::{CheckpointStore, InMemoryCheckpointStore};
use conveyor_core::{ConsumerIdentity, ReceivedEvent, StartPosition, StreamProperties};
use conveyor_processor::{
    LoadBalancingStrategy, PartitionReceiver, Processor, ProcessorOptions, StreamClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct DemoStream {
    partition_ids: Vec<String>,
}

#[async_trait]
impl StreamClient for DemoStream {
    async fn properties(&self) -> conveyor_core::Result<StreamProperties> {
        Ok(StreamProperties {
            name: "telemetry".to_string(),
            partition_ids: self.partition_ids.clone(),
        })
    }

    async fn open_receiver(
        &self,
        partition_id: &str,
        _start_position: StartPosition,
        _owner_level: Option<i64>,
    ) -> conveyor_core::Result<Box<dyn PartitionReceiver>> {
        Ok(Box::new(DemoReceiver {
            partition_id: partition_id.to_string(),
            next_sequence: 0,
        }))
    }
}

struct DemoReceiver {
    partition_id: String,
    next_sequence: i64,
}

#[async_trait]
impl PartitionReceiver for DemoReceiver {
    async fn receive(
        &mut self,
        max_count: usize,
        _max_wait: Duration,
    ) -> conveyor_core::Result<Vec<ReceivedEvent>> {
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batch = max_count.min(10) as i64;
        let events: Vec<ReceivedEvent> = (0..batch)
            .map(|i| {
                let sequence = self.next_sequence + i;
                ReceivedEvent::new(
                    format!("[{}] event {}", self.partition_id, sequence),
                    sequence * 64,
                    sequence,
                )
            })
            .collect();
        self.next_sequence += events.len() as i64;
        Ok(events)
    }

    async fn close(&mut self) -> conveyor_core::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let (stop, _initial_rx) = watch::channel(false);

    let mut runs = Vec::new();

    for name in ["alpha", "beta"] {
        let transport = Arc::new(DemoStream {
            partition_ids: (0..8).map(|i| i.to_string()).collect(),
        });
        let identity =
            ConsumerIdentity::new("demo.local", "telemetry", "$Default").with_client_id(name);

        let processor = Arc::new(Processor::new(
            transport,
            store.clone(),
            identity,
            ProcessorOptions::default()
                .with_strategy(LoadBalancingStrategy::Greedy)
                .with_update_interval(Duration::from_millis(250)),
        )?);

        runs.push(tokio::spawn({
            let processor = processor.clone();
            let stop_rx = stop.subscribe();
            async move { processor.run(stop_rx).await }
        }));

        tokio::spawn(async move {
            while let Some(client) = processor.next_partition_client().await {
                println!("{name} acquired partition {}", client.partition_id());
                tokio::spawn(async move {
                    loop {
                        match client.receive_events(10, Duration::from_millis(200)).await {
                            Ok(events) => {
                                if let Some(last) = events.last() {
                                    let _ = client.update_checkpoint(last).await;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    stop.send(true)?;
    for run in runs {
        run.await??;
    }

    println!("\nfinal ownership:");
    for ownership in store
        .list_ownership("demo.local", "telemetry", "$default")
        .await?
    {
        println!("  partition {} -> {}", ownership.partition_id, ownership.owner_id);
    }

    Ok(())
}
