//! Retry and backoff used while acquiring shard iterators and discovering shards

mod backoff;
mod error;

pub use backoff::{Backoff, FixedBackoff};
pub use error::RetryError;

use tokio::select;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, Default)]
pub struct RetryConfig {
    /// Maximum number of attempts (None for infinite)
    pub max_retries: Option<u32>,
}

impl RetryConfig {
    /// Keep retrying until success or shutdown
    pub fn unbounded() -> Self {
        Self { max_retries: None }
    }
}

/// Helper for retrying operations with backoff
pub struct RetryHandle<B: Backoff> {
    config: RetryConfig,
    backoff: B,
    attempts: u32,
}

impl<B: Backoff> RetryHandle<B> {
    pub fn new(config: RetryConfig, backoff: B) -> Self {
        Self {
            config,
            backoff,
            attempts: 0,
        }
    }

    /// Retry an operation with backoff
    ///
    /// Both the operation and the backoff sleep are abandoned as soon as the
    /// shutdown channel reports `true`.
    pub async fn retry<F, Fut, T, E>(
        &mut self,
        mut operation: F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        loop {
            if *shutdown.borrow() {
                return Err(RetryError::Interrupted);
            }

            self.attempts += 1;
            trace!(attempt = self.attempts, "Executing operation");

            select! {
                result = operation() => {
                    match result {
                        Ok(value) => {
                            debug!(attempts = self.attempts, "Operation succeeded");
                            return Ok(value);
                        }
                        Err(e) => {
                            if let Some(max) = self.config.max_retries {
                                if self.attempts >= max {
                                    warn!(
                                        attempts = self.attempts,
                                        error = %e,
                                        "Maximum retry attempts exceeded"
                                    );
                                    return Err(RetryError::MaxRetriesExceeded(self.attempts, e.to_string()));
                                }
                            }

                            let delay = self.backoff.next_delay(self.attempts);
                            warn!(
                                attempt = self.attempts,
                                delay_ms = ?delay.as_millis(),
                                error = %e,
                                "Operation failed, retrying after delay"
                            );

                            select! {
                                _ = tokio::time::sleep(delay) => continue,
                                _ = shutdown.changed() => {
                                    debug!("Retry interrupted by shutdown signal");
                                    return Err(RetryError::Interrupted);
                                }
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Operation interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            }
        }
    }

    /// Get the current attempt count
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
