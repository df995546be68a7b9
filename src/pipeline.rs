//! Boundary traits for the collaborators the engine feeds
//!
//! The engine never talks to an output destination directly. It resolves tags and
//! builds one [`EntryProcessor`] per partition or queue through a [`Sink`], and hands
//! every [`LogEntry`] to that processor. Timestamp heuristics live behind
//! [`TimeExtractor`].

use crate::entry::{EntryTag, LogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Only this many leading payload bytes are scanned for a timestamp
const TIMESTAMP_SCAN_LIMIT: usize = 256;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Output multiplexer the ingested entries are ultimately forwarded to
#[async_trait]
pub trait Sink: Send + Sync {
    /// Resolve a configured tag name, failing if the name is unknown
    fn resolve_tag(&self, name: &str) -> anyhow::Result<EntryTag>;

    /// Build a dedicated processor chain for one partition or queue
    fn new_processor_set(
        &self,
        tag: EntryTag,
        preprocessors: &[String],
    ) -> anyhow::Result<Box<dyn EntryProcessor>>;

    /// Flush anything buffered, waiting at most `timeout`
    async fn sync(&self, _timeout: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-partition transformation chain in front of the sink
#[async_trait]
pub trait EntryProcessor: Send + Sync {
    /// Process one entry; `cancel` fires once the shutdown grace period has elapsed
    async fn process(&self, entry: LogEntry, cancel: &CancellationToken) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Pulls a timestamp out of a raw payload
pub trait TimeExtractor: Send + Sync {
    /// `Ok(None)` means no timestamp was found
    fn extract(&mut self, payload: &[u8]) -> anyhow::Result<Option<DateTime<Utc>>>;
}

/// Builds one [`TimeExtractor`] per partition consumer
pub trait TimeExtractorFactory: Send + Sync {
    fn build(&self, zone: NaiveTimezone) -> anyhow::Result<Box<dyn TimeExtractor>>;
}

/// Zone applied to payload timestamps that carry no UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NaiveTimezone {
    #[default]
    Utc,
    Local,
    Named(Tz),
}

impl NaiveTimezone {
    fn to_utc(self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            NaiveTimezone::Utc => Some(naive.and_utc()),
            NaiveTimezone::Local => Local
                .from_local_datetime(naive)
                .earliest()
                .map(|ts| ts.with_timezone(&Utc)),
            NaiveTimezone::Named(tz) => tz
                .from_local_datetime(naive)
                .earliest()
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

/// Finds the left-most RFC 3339 or `YYYY-MM-DD HH:MM:SS` timestamp in a payload
#[derive(Debug, Clone, Default)]
pub struct LeadingTimestampExtractor {
    zone: NaiveTimezone,
}

impl LeadingTimestampExtractor {
    pub fn new(zone: NaiveTimezone) -> Self {
        Self { zone }
    }

    fn parse_at(&self, candidate: &str) -> Option<DateTime<Utc>> {
        if let Ok((ts, _)) = DateTime::parse_and_remainder(candidate, "%+") {
            return Some(ts.with_timezone(&Utc));
        }

        NAIVE_FORMATS.iter().find_map(|fmt| {
            let (naive, _) = NaiveDateTime::parse_and_remainder(candidate, fmt).ok()?;
            self.zone.to_utc(&naive)
        })
    }
}

impl TimeExtractor for LeadingTimestampExtractor {
    fn extract(&mut self, payload: &[u8]) -> anyhow::Result<Option<DateTime<Utc>>> {
        let prefix = &payload[..payload.len().min(TIMESTAMP_SCAN_LIMIT)];
        let text = String::from_utf8_lossy(prefix);

        let mut prev_alnum = false;
        for (idx, ch) in text.char_indices() {
            let starts_token = ch.is_ascii_digit() && !prev_alnum;
            prev_alnum = ch.is_alphanumeric();
            if !starts_token {
                continue;
            }
            if let Some(ts) = self.parse_at(&text[idx..]) {
                return Ok(Some(ts));
            }
        }
        Ok(None)
    }
}

/// Factory for [`LeadingTimestampExtractor`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTimeExtractorFactory;

impl TimeExtractorFactory for DefaultTimeExtractorFactory {
    fn build(&self, zone: NaiveTimezone) -> anyhow::Result<Box<dyn TimeExtractor>> {
        Ok(Box::new(LeadingTimestampExtractor::new(zone)))
    }
}
