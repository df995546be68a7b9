//! Stream Ingest - resumable log ingestion from Kinesis shards and SQS queues
//!
//! Every open shard and every configured queue is consumed by its own task. Shard
//! progress is checkpointed per `(stream, shard)` to a snapshot file so a restart
//! resumes right after the last record handed to the pipeline.

pub mod client;
pub mod config;
pub mod entry;
pub mod error;
pub mod lifecycle;
pub mod monitoring;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod shard;
pub mod shutdown;
pub mod store;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;
#[cfg(test)]
mod tests;

pub use client::{InitialPosition, SourceError, StreamClientTrait};
pub use config::IngestConfig;
pub use entry::{EntryTag, LogEntry};
pub use error::{IngestError, Result};
pub use lifecycle::{
    wait_for_quit, AwsConnector, IngestCoordinator, RunningIngest, ShutdownSummary,
    SourceConnector,
};
pub use pipeline::{EntryProcessor, NaiveTimezone, Sink, TimeExtractor};
pub use queue::QueueClientTrait;
pub use shutdown::ShutdownSignal;

// Re-export main traits
pub use crate::store::CheckpointStore;

// Re-export implementations
pub use crate::store::file::FileCheckpointStore;
pub use crate::store::memory::InMemoryCheckpointStore;
