//! Two-stage shutdown shared by every task
//!
//! Stage one is cooperative: the running flag flips and the done channel fires, so
//! loops exit after their current iteration and blocked receives wake up. Stage two
//! cancels a [`CancellationToken`] after the grace period, aborting any source
//! request or pipeline call still in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

/// Owner side of the shutdown signals
#[derive(Debug)]
pub struct ShutdownController {
    running: Arc<AtomicBool>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            running: Arc::new(AtomicBool::new(true)),
            done_tx,
            done_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle passed to every spawned task
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            running: self.running.clone(),
            done: self.done_rx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stage one: ask every loop to stop after its current iteration
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.running.store(false, Ordering::SeqCst);
        // send_replace never fails, even if no receiver is left
        self.done_tx.send_replace(true);
    }

    /// Stage two: cancel the shared token once `grace` has elapsed
    pub fn cancel_after(&self, grace: Duration) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            debug!(grace_ms = grace.as_millis() as u64, "Grace period elapsed");
            cancel.cancel();
        })
    }
}

/// Task side of the shutdown signals
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    running: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl ShutdownSignal {
    /// False once a stop has been requested
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver that changes to `true` when a stop is requested
    pub fn done_receiver(&self) -> watch::Receiver<bool> {
        self.done.clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the grace period has run out
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
