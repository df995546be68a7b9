//! Stream source abstraction and its AWS Kinesis implementation

use async_trait::async_trait;
use aws_sdk_kinesis::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::operation::get_records::GetRecordsError;
use aws_sdk_kinesis::operation::get_shard_iterator::GetShardIteratorError;
use aws_sdk_kinesis::operation::list_shards::ListShardsError;
use aws_sdk_kinesis::types::{Shard, ShardIteratorType};
use aws_sdk_kinesis::Client;
use aws_smithy_types_convert::date_time::DateTimeExt;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Classification of a failed source request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Provisioned throughput exceeded")]
    ThroughputExceeded,

    #[error("Iterator expired")]
    ExpiredIterator,

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Errors retried in place on the same iterator
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::ExpiredIterator)
    }
}

/// A shard discovered at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub id: String,
    /// Closed shards have an ending sequence number and never yield an iterator
    pub closed: bool,
}

impl PartitionDescriptor {
    pub fn open(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            closed: false,
        }
    }

    pub fn closed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            closed: true,
        }
    }
}

/// Default place to start reading a shard that has no checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialPosition {
    /// Start from the oldest available record
    #[default]
    TrimHorizon,
    /// Start from the newest record
    Latest,
}

/// Position requested when acquiring a shard iterator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    TrimHorizon,
    Latest,
    /// Strictly after the given sequence number
    AfterSequenceNumber(String),
}

impl StartingPosition {
    /// Resume after `checkpoint` if there is one, otherwise use the configured default
    pub fn resolve(checkpoint: Option<String>, default: InitialPosition) -> Self {
        match (checkpoint, default) {
            (Some(seq), _) if !seq.is_empty() => StartingPosition::AfterSequenceNumber(seq),
            (_, InitialPosition::TrimHorizon) => StartingPosition::TrimHorizon,
            (_, InitialPosition::Latest) => StartingPosition::Latest,
        }
    }
}

impl fmt::Display for StartingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartingPosition::TrimHorizon => write!(f, "TRIM_HORIZON"),
            StartingPosition::Latest => write!(f, "LATEST"),
            StartingPosition::AfterSequenceNumber(seq) => write!(f, "AFTER_SEQUENCE_NUMBER({seq})"),
        }
    }
}

/// One record pulled from a shard
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub sequence_number: String,
    pub data: Bytes,
    pub arrival_timestamp: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(
        sequence_number: impl Into<String>,
        data: impl Into<Bytes>,
        arrival_timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            sequence_number: sequence_number.into(),
            data: data.into(),
            arrival_timestamp,
        }
    }
}

/// Result of a single get-batch request
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<SourceRecord>,
    /// `None` once the shard has been closed and fully read
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

impl RecordBatch {
    /// Total size of the raw record payloads
    pub fn data_size(&self) -> usize {
        self.records.iter().map(|r| r.data.len()).sum()
    }
}

#[async_trait]
pub trait StreamClientTrait: Send + Sync {
    /// List every shard of the stream, following pagination to the end
    async fn discover_partitions(
        &self,
        stream_name: &str,
    ) -> std::result::Result<Vec<PartitionDescriptor>, SourceError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: &StartingPosition,
    ) -> std::result::Result<String, SourceError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> std::result::Result<RecordBatch, SourceError>;
}

/// Typed error variants the consumers react to
trait KnownServiceError {
    fn known_kind(&self) -> Option<SourceError>;
}

impl KnownServiceError for GetRecordsError {
    fn known_kind(&self) -> Option<SourceError> {
        match self {
            GetRecordsError::ExpiredIteratorException(_) => Some(SourceError::ExpiredIterator),
            GetRecordsError::ProvisionedThroughputExceededException(_) => {
                Some(SourceError::ThroughputExceeded)
            }
            _ => None,
        }
    }
}

impl KnownServiceError for GetShardIteratorError {
    fn known_kind(&self) -> Option<SourceError> {
        match self {
            GetShardIteratorError::ProvisionedThroughputExceededException(_) => {
                Some(SourceError::ThroughputExceeded)
            }
            _ => None,
        }
    }
}

impl KnownServiceError for ListShardsError {
    fn known_kind(&self) -> Option<SourceError> {
        match self {
            ListShardsError::LimitExceededException(_) => Some(SourceError::ThroughputExceeded),
            _ => None,
        }
    }
}

/// Map an SDK failure onto the throttled / expired / other split
///
/// Typed variants are matched first; the error code is the fallback for
/// errors the SDK could not model.
fn classify<E, R>(err: SdkError<E, R>) -> SourceError
where
    E: KnownServiceError + ProvideErrorMetadata,
{
    let Some(service) = err.as_service_error() else {
        return SourceError::Other(err.to_string());
    };
    if let Some(kind) = service.known_kind() {
        return kind;
    }
    match service.code() {
        Some("ProvisionedThroughputExceededException") | Some("LimitExceededException") => {
            SourceError::ThroughputExceeded
        }
        Some("ExpiredIteratorException") => SourceError::ExpiredIterator,
        Some(code) => SourceError::Other(format!(
            "{}: {}",
            code,
            service.message().unwrap_or_default()
        )),
        None => SourceError::Other(err.to_string()),
    }
}

/// A shard with an ending sequence number has been closed by a reshard
fn partition_from_shard(shard: &Shard) -> PartitionDescriptor {
    let closed = shard
        .sequence_number_range()
        .and_then(|r| r.ending_sequence_number())
        .is_some();
    PartitionDescriptor {
        id: shard.shard_id().to_string(),
        closed,
    }
}

#[async_trait]
impl StreamClientTrait for Client {
    async fn discover_partitions(
        &self,
        stream_name: &str,
    ) -> std::result::Result<Vec<PartitionDescriptor>, SourceError> {
        let mut partitions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // the stream name may not be combined with a pagination token
            let req = match &next_token {
                Some(token) => self.list_shards().next_token(token),
                None => self.list_shards().stream_name(stream_name),
            };
            let response = req.send().await.map_err(classify)?;

            for shard in response.shards() {
                let partition = partition_from_shard(shard);
                trace!(shard_id = %partition.id, closed = partition.closed, "Discovered shard");
                partitions.push(partition);
            }

            match response.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            stream = %stream_name,
            shards = partitions.len(),
            "Read shards from stream"
        );
        Ok(partitions)
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: &StartingPosition,
    ) -> std::result::Result<String, SourceError> {
        let req = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id);

        let req = match position {
            StartingPosition::TrimHorizon => req.shard_iterator_type(ShardIteratorType::TrimHorizon),
            StartingPosition::Latest => req.shard_iterator_type(ShardIteratorType::Latest),
            StartingPosition::AfterSequenceNumber(seq) => req
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq),
        };

        let response = req.send().await.map_err(classify)?;
        response
            .shard_iterator()
            .map(String::from)
            .ok_or_else(|| SourceError::Other("Got nil initial shard iterator".to_string()))
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> std::result::Result<RecordBatch, SourceError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(classify)?;

        let records = response
            .records()
            .iter()
            .map(|r| {
                let arrival_timestamp = r.approximate_arrival_timestamp().and_then(|ts| {
                    ts.to_chrono_utc()
                        .map_err(|e| warn!(error = %e, "Unrepresentable arrival timestamp"))
                        .ok()
                });
                SourceRecord {
                    sequence_number: r.sequence_number().to_string(),
                    data: Bytes::copy_from_slice(r.data().as_ref()),
                    arrival_timestamp,
                }
            })
            .collect();

        Ok(RecordBatch {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }
}

/// Build a Kinesis client for `region`, optionally with static credentials
pub async fn connect_kinesis(
    region: &str,
    credentials: Option<aws_credential_types::Credentials>,
) -> Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));
    if let Some(creds) = credentials {
        loader = loader.credentials_provider(creds);
    }
    Client::new(&loader.load().await)
}
