//! Consumption of pull-based queues
//!
//! Queues have no ordered cursor, so nothing is checkpointed here. Redelivery and
//! acknowledgement stay with the queue service.

mod client;

pub use client::{connect_sqs, QueueClientTrait, QueueMessage, SENT_TIMESTAMP_ATTRIBUTE};

use crate::config::BackoffPolicy;
use crate::entry::{EntryTag, LogEntry};
use crate::error::{IngestError, Result};
use crate::monitoring::ShardMetrics;
use crate::pipeline::EntryProcessor;
use crate::shutdown::ShutdownSignal;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings for one queue consumer
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub tag: EntryTag,
    pub source_address: Option<IpAddr>,
    pub ignore_timestamps: bool,
    pub max_messages: i32,
    pub wait: Duration,
    pub backoff: BackoffPolicy,
}

pub struct QueueConsumer {
    queue_url: String,
    client: Arc<dyn QueueClientTrait>,
    processor: Box<dyn EntryProcessor>,
    metrics: Arc<ShardMetrics>,
    settings: QueueSettings,
    shutdown: ShutdownSignal,
}

impl QueueConsumer {
    pub fn new(
        queue_url: impl Into<String>,
        client: Arc<dyn QueueClientTrait>,
        processor: Box<dyn EntryProcessor>,
        metrics: Arc<ShardMetrics>,
        settings: QueueSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            queue_url: queue_url.into(),
            client,
            processor,
            metrics,
            settings,
            shutdown,
        }
    }

    /// Receive and forward messages until shutdown
    ///
    /// Returns an error if the processor rejects an entry; the queue is abandoned
    /// for the rest of the run in that case. The processor is closed either way.
    pub async fn run(self) -> Result<()> {
        info!(queue = %self.queue_url, "Starting queue consumer");
        let result = self.consume().await;

        if let Err(e) = self.processor.close().await {
            error!(queue = %self.queue_url, error = %e, "Failed to close processor set");
        }
        match &result {
            Ok(()) => info!(queue = %self.queue_url, "Queue consumer stopped"),
            Err(e) => error!(queue = %self.queue_url, error = %e, "Queue consumer aborted"),
        }
        result
    }

    async fn consume(&self) -> Result<()> {
        let mut done = self.shutdown.done_receiver();
        let attributes: &[&str] = if self.settings.ignore_timestamps {
            &[]
        } else {
            &[SENT_TIMESTAMP_ATTRIBUTE]
        };

        while self.shutdown.is_running() {
            let received = tokio::select! {
                result = self.client.receive(
                    &self.queue_url,
                    self.settings.max_messages,
                    self.settings.wait,
                    attributes,
                ) => result,
                _ = done.changed() => {
                    debug!(queue = %self.queue_url, "Receive interrupted by stop request");
                    return Ok(());
                }
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    error!(queue = %self.queue_url, error = %e, "Failed to receive messages");
                    tokio::time::sleep(self.settings.backoff.throttle()).await;
                    continue;
                }
            };

            let mut bytes_read = 0;
            let mut bytes_emitted = 0;
            let mut newest: Option<DateTime<Utc>> = None;

            for message in messages {
                let timestamp = if self.settings.ignore_timestamps {
                    Some(Utc::now())
                } else {
                    let ts = self.sent_timestamp(&message);
                    newest = newest.max(ts);
                    ts
                };

                bytes_read += message.body.len();
                let entry = LogEntry::new(
                    self.settings.tag,
                    self.settings.source_address,
                    timestamp,
                    message.body,
                );
                bytes_emitted += entry.size();

                self.processor
                    .process(entry, self.shutdown.cancel_token())
                    .await
                    .map_err(|e| {
                        IngestError::Pipeline(format!(
                            "queue {}: failed to handle entry: {}",
                            self.queue_url, e
                        ))
                    })?;
            }

            let lag = newest.map(|ts| (Utc::now() - ts).num_milliseconds().max(0));
            self.metrics.update(lag, bytes_read, bytes_emitted);
        }
        Ok(())
    }

    fn sent_timestamp(&self, message: &QueueMessage) -> Option<DateTime<Utc>> {
        let Some(raw) = message.attributes.get(SENT_TIMESTAMP_ATTRIBUTE) else {
            warn!(
                queue = %self.queue_url,
                attribute = SENT_TIMESTAMP_ATTRIBUTE,
                "Message is missing timestamp attribute"
            );
            return None;
        };
        match raw.parse::<i64>() {
            Ok(millis) => DateTime::from_timestamp_millis(millis),
            Err(e) => {
                error!(
                    queue = %self.queue_url,
                    value = %raw,
                    error = %e,
                    "Failed to parse timestamp attribute"
                );
                None
            }
        }
    }
}
