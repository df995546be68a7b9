//! Error types for the ingest engine

use crate::client::SourceError;
use thiserror::Error;
use tokio::task::JoinError;

/// Main error type for ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Can't resolve tag {0}")]
    UnknownTag(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to discover partitions for {source_id}: {message}")]
    Discovery { source_id: String, message: String },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }

    /// Errors that must stop the process before any consumer is spawned
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            IngestError::Config(_) | IngestError::UnknownTag(_) | IngestError::Discovery { .. }
        )
    }
}

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error type for checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to read state file: {0}")]
    ReadFailed(String),

    #[error("Failed to write state file: {0}")]
    WriteFailed(String),

    #[error("Invalid checkpoint data: {0}")]
    InvalidData(String),
}

impl From<JoinError> for IngestError {
    fn from(err: JoinError) -> Self {
        IngestError::Other(err.into())
    }
}
