use crate::store::CheckpointStore;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

/// In-memory implementation of checkpoint storage
///
/// Nothing survives a restart; useful for tests and for sources where replaying
/// from the default position is acceptable.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        debug!("Initializing in-memory checkpoint store");
        Self::default()
    }

    /// Snapshot of every stored checkpoint
    pub async fn all_checkpoints(&self) -> HashMap<(String, String), String> {
        self.checkpoints.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    #[instrument(skip(self))]
    async fn get_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let checkpoint = self
            .checkpoints
            .read()
            .await
            .get(&(source_id.to_string(), partition_id.to_string()))
            .cloned();

        trace!(checkpoint = ?checkpoint, "Retrieved checkpoint from memory");
        Ok(checkpoint)
    }

    #[instrument(skip(self))]
    async fn save_checkpoint(
        &self,
        source_id: &str,
        partition_id: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        self.checkpoints.write().await.insert(
            (source_id.to_string(), partition_id.to_string()),
            token.to_string(),
        );

        trace!("Checkpoint saved to memory");
        Ok(())
    }
}
