//! Resumable consumption of a single stream shard
//!
//! Each open shard gets one [`ShardConsumer`] running as its own task. The consumer
//! moves through three states:
//!
//! - **Acquiring**: read the stored checkpoint and request an iterator positioned
//!   right after it (or at the configured default when there is none). Failures are
//!   retried after a fixed backoff.
//! - **Streaming**: fetch batches, hand every record to the pipeline, and store the
//!   last sequence number of each batch once the whole batch was handed off.
//! - **Closed**: terminal; the shard's processor is closed.
//!
//! An expired iterator sends the consumer back to Acquiring, which re-reads the
//! checkpoint store instead of trusting any in-memory position.

use crate::client::{InitialPosition, RecordBatch, SourceError, StartingPosition, StreamClientTrait};
use crate::config::BackoffPolicy;
use crate::entry::{EntryTag, LogEntry};
use crate::monitoring::ShardMetrics;
use crate::pipeline::{EntryProcessor, TimeExtractor};
use crate::retry::{FixedBackoff, RetryConfig, RetryHandle};
use crate::shutdown::ShutdownSignal;
use crate::store::CheckpointStore;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Per-source settings shared by all shard consumers of a stream
#[derive(Debug, Clone)]
pub struct ShardSettings {
    pub tag: EntryTag,
    pub source_address: Option<IpAddr>,
    pub initial_position: InitialPosition,
    pub batch_size: i32,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShardState {
    Acquiring,
    Streaming { iterator: String },
    Closed,
}

/// Counters for one processed batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct BatchOutcome {
    entries: usize,
    bytes_emitted: usize,
    failed: usize,
}

pub struct ShardConsumer {
    stream_name: String,
    shard_id: String,
    client: Arc<dyn StreamClientTrait>,
    store: Arc<dyn CheckpointStore>,
    processor: Box<dyn EntryProcessor>,
    metrics: Arc<ShardMetrics>,
    settings: ShardSettings,
    /// Dropped for the rest of the run after the first failed extraction
    time_extractor: Option<Box<dyn TimeExtractor>>,
    shutdown: ShutdownSignal,
}

impl ShardConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_name: impl Into<String>,
        shard_id: impl Into<String>,
        client: Arc<dyn StreamClientTrait>,
        store: Arc<dyn CheckpointStore>,
        processor: Box<dyn EntryProcessor>,
        metrics: Arc<ShardMetrics>,
        settings: ShardSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            shard_id: shard_id.into(),
            client,
            store,
            processor,
            metrics,
            settings,
            time_extractor: None,
            shutdown,
        }
    }

    /// Take timestamps from payloads instead of source arrival times
    pub fn with_time_extractor(mut self, extractor: Box<dyn TimeExtractor>) -> Self {
        self.time_extractor = Some(extractor);
        self
    }

    /// Consume the shard until shutdown or until the shard is closed
    pub async fn run(mut self) {
        info!(
            stream = %self.stream_name,
            shard_id = %self.shard_id,
            "Starting shard consumer"
        );

        let mut state = ShardState::Acquiring;
        loop {
            state = match state {
                ShardState::Acquiring => self.acquire().await,
                ShardState::Streaming { iterator } => self.stream(iterator).await,
                ShardState::Closed => break,
            };
        }

        if let Err(e) = self.processor.close().await {
            error!(
                stream = %self.stream_name,
                shard_id = %self.shard_id,
                error = %e,
                "Failed to close processor set"
            );
        }
        info!(
            stream = %self.stream_name,
            shard_id = %self.shard_id,
            "Shard consumer stopped"
        );
    }

    async fn acquire(&mut self) -> ShardState {
        let this = &*self;
        let mut retry = RetryHandle::new(
            RetryConfig::unbounded(),
            FixedBackoff::new(this.settings.backoff.acquire()),
        );
        let mut done = this.shutdown.done_receiver();

        let result = retry
            .retry(
                move || async move {
                    let checkpoint = this
                        .store
                        .get_checkpoint(&this.stream_name, &this.shard_id)
                        .await?;
                    if checkpoint.is_none() {
                        debug!(
                            stream = %this.stream_name,
                            shard_id = %this.shard_id,
                            default = ?this.settings.initial_position,
                            "No previous sequence number, using default position"
                        );
                    }
                    let position =
                        StartingPosition::resolve(checkpoint, this.settings.initial_position);
                    this.client
                        .get_shard_iterator(&this.stream_name, &this.shard_id, &position)
                        .await
                        .map_err(|e| anyhow::anyhow!("error on shard {}: {}", this.shard_id, e))
                },
                &mut done,
            )
            .await;

        match result {
            Ok(iterator) => {
                debug!(shard_id = %self.shard_id, "Acquired shard iterator");
                ShardState::Streaming { iterator }
            }
            Err(e) => {
                debug!(shard_id = %self.shard_id, error = %e, "Stopped while acquiring iterator");
                ShardState::Closed
            }
        }
    }

    async fn stream(&mut self, mut iterator: String) -> ShardState {
        let backoff = self.settings.backoff;

        loop {
            if !self.shutdown.is_running() {
                return ShardState::Closed;
            }

            let fetched = tokio::select! {
                result = self.client.get_records(&iterator, self.settings.batch_size) => result,
                _ = self.shutdown.cancelled() => {
                    info!(shard_id = %self.shard_id, "Cancelled while fetching records");
                    return ShardState::Closed;
                }
            };

            match fetched {
                Ok(batch) => {
                    if batch.records.is_empty() {
                        self.metrics.update(batch.millis_behind_latest, 0, 0);
                        tokio::time::sleep(backoff.idle()).await;
                    } else {
                        let outcome = self.process_batch(&batch).await;
                        self.metrics.update(
                            batch.millis_behind_latest,
                            batch.data_size(),
                            outcome.bytes_emitted,
                        );
                    }

                    match batch.next_iterator {
                        Some(next) => iterator = next,
                        None => {
                            info!(
                                stream = %self.stream_name,
                                shard_id = %self.shard_id,
                                "Shard has been closed, no more records"
                            );
                            return ShardState::Closed;
                        }
                    }
                }
                Err(e) if !e.is_retryable() => {
                    info!(shard_id = %self.shard_id, error = %e, "Iterator expired, re-initializing");
                    tokio::time::sleep(backoff.expiry()).await;
                    return ShardState::Acquiring;
                }
                Err(SourceError::ThroughputExceeded) => {
                    warn!(shard_id = %self.shard_id, "Throughput exceeded, trying again");
                    tokio::time::sleep(backoff.throttle()).await;
                }
                Err(e) => {
                    error!(shard_id = %self.shard_id, error = %e, "Failed to get records");
                    tokio::time::sleep(backoff.throttle()).await;
                }
            }
        }
    }

    /// Hand every record to the processor, then checkpoint the last one
    async fn process_batch(&mut self, batch: &RecordBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut last_sequence: Option<&str> = None;

        for record in &batch.records {
            let extracted = self
                .time_extractor
                .as_mut()
                .map(|tx| tx.extract(&record.data));
            let timestamp = match extracted {
                Some(Ok(Some(ts))) => Some(ts),
                Some(result) => {
                    warn!(
                        shard_id = %self.shard_id,
                        sequence = %record.sequence_number,
                        error = ?result.err(),
                        "Timestamp extraction failed, using arrival timestamps for the rest of the run"
                    );
                    self.time_extractor = None;
                    record.arrival_timestamp.or_else(|| Some(Utc::now()))
                }
                None => record.arrival_timestamp.or_else(|| Some(Utc::now())),
            };

            let entry = LogEntry::new(
                self.settings.tag,
                self.settings.source_address,
                timestamp,
                record.data.clone(),
            );
            let size = entry.size();

            if let Err(e) = self
                .processor
                .process(entry, self.shutdown.cancel_token())
                .await
            {
                error!(
                    shard_id = %self.shard_id,
                    sequence = %record.sequence_number,
                    error = %e,
                    "Failed to handle entry"
                );
                outcome.failed += 1;
            }
            outcome.entries += 1;
            outcome.bytes_emitted += size;
            last_sequence = Some(&record.sequence_number);
        }

        if let Some(sequence) = last_sequence {
            match self
                .store
                .save_checkpoint(&self.stream_name, &self.shard_id, sequence)
                .await
            {
                Ok(()) => trace!(shard_id = %self.shard_id, sequence = %sequence, "Checkpoint updated"),
                Err(e) => warn!(
                    shard_id = %self.shard_id,
                    sequence = %sequence,
                    error = %e,
                    "Failed to update checkpoint"
                ),
            }
        }

        debug!(
            shard_id = %self.shard_id,
            entries = outcome.entries,
            failed = outcome.failed,
            "Batch handed to pipeline"
        );
        outcome
    }
}
