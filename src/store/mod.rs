//! Checkpoint storage for resumable shard consumption
//!
//! A checkpoint maps `(source id, partition id)` to the sequence token of the last
//! record handed to the pipeline. Stores are shared by every consumer task, so all
//! implementations must be safe to call concurrently.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod file;
pub mod memory;

/// Trait for checkpoint storage implementations
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Retrieve the resume token for a partition, if one was ever saved
    async fn get_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Record a resume token for a partition (last write wins)
    async fn save_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
        token: &str,
    ) -> anyhow::Result<()>;

    /// Persist everything saved so far
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final flush on clean shutdown
    async fn close(&self) -> anyhow::Result<()> {
        self.flush().await
    }
}

/// Flush `store` every `interval` until the done channel fires
///
/// Flush failures are logged and retried on the next tick.
pub fn spawn_periodic_flush(
    store: Arc<dyn CheckpointStore>,
    interval: Duration,
    mut done: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = store.flush().await {
                        warn!(error = %e, "Failed to flush checkpoint state");
                    }
                }
                _ = done.changed() => {
                    debug!("Stopping periodic checkpoint flush");
                    break;
                }
            }
        }
    })
}

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
