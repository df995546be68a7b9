use std::time::Duration;
use tracing::trace;

/// Trait defining backoff behavior
pub trait Backoff: Send + Sync {
    /// Calculate the next backoff delay
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Fixed backoff implementation
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        trace!(attempt = attempt, delay_ms = ?self.delay.as_millis(), "Fixed backoff delay");
        self.delay
    }
}
