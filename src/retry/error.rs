use crate::IngestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Maximum retries ({0}) exceeded: {1}")]
    MaxRetriesExceeded(u32, String),

    #[error("Retry interrupted by shutdown signal")]
    Interrupted,
}

impl From<RetryError> for IngestError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::MaxRetriesExceeded(attempts, msg) => IngestError::Other(anyhow::anyhow!(
                "After {} attempts: {}",
                attempts,
                msg
            )),
            RetryError::Interrupted => IngestError::Shutdown,
        }
    }
}

impl RetryError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RetryError::Interrupted)
    }
}
