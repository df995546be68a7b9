//! Test utilities and mock implementations for exercising the consumers


use crate::client::{RecordBatch, SourceRecord};
use crate::config::BackoffPolicy;
use crate::queue::{QueueMessage, SENT_TIMESTAMP_ATTRIBUTE};
use chrono::{DateTime, Utc};

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// A record whose payload is `data-{sequence}`
    pub fn create_test_record(sequence_number: &str) -> SourceRecord {
        SourceRecord::new(
            sequence_number,
            format!("data-{}", sequence_number).into_bytes(),
            Some(Utc::now()),
        )
    }

    /// A batch with one record per sequence number and a next iterator
    pub fn create_test_batch(sequence_numbers: &[&str]) -> RecordBatch {
        RecordBatch {
            records: sequence_numbers
                .iter()
                .map(|s| Self::create_test_record(s))
                .collect(),
            next_iterator: Some("next".to_string()),
            millis_behind_latest: Some(0),
        }
    }

    /// An empty batch that keeps the shard open
    pub fn create_empty_batch() -> RecordBatch {
        Self::create_test_batch(&[])
    }

    /// The final batch of a closed shard
    pub fn create_closing_batch(sequence_numbers: &[&str]) -> RecordBatch {
        RecordBatch {
            next_iterator: None,
            ..Self::create_test_batch(sequence_numbers)
        }
    }

    /// A queue message carrying its sent time
    pub fn create_queue_message(body: &str, sent: DateTime<Utc>) -> QueueMessage {
        QueueMessage::new(body.to_string())
            .with_attribute(SENT_TIMESTAMP_ATTRIBUTE, sent.timestamp_millis().to_string())
    }

    /// Backoff short enough to keep tests fast
    pub fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            acquire: 20,
            idle: 5,
            throttle: 20,
            expiry: 5,
        }
    }
}
