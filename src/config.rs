//! Configuration for the ingest engine
//!
//! One [`IngestConfig`] holds global settings plus any number of named sources.
//! A source is either a sharded stream or a set of pull queues; both variants are
//! consumed through the same lifecycle.

use crate::client::InitialPosition;
use crate::error::{IngestError, Result};
use crate::pipeline::NaiveTimezone;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATE_STORE: &str = "/opt/ingest/etc/kinesis_ingest.state";
const MAX_STREAM_BATCH: i32 = 10_000;
const MAX_QUEUE_BATCH: i32 = 10;
const MAX_QUEUE_WAIT_SECS: u64 = 20;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IngestConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

/// Settings shared by every source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GlobalConfig {
    pub state_store_location: PathBuf,
    /// Source address stamped on every entry unless a queue overrides it
    pub source_override: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    /// Seconds between checkpoint flushes
    pub checkpoint_flush_interval: u64,
    /// Milliseconds between the stop request and forced cancellation
    pub shutdown_grace_period: u64,
    pub backoff: BackoffPolicy,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            state_store_location: PathBuf::from(DEFAULT_STATE_STORE),
            source_override: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            checkpoint_flush_interval: 15,
            shutdown_grace_period: 1000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl GlobalConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_flush_interval)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period)
    }

    pub fn source_address(&self) -> Result<Option<IpAddr>> {
        parse_source_override(self.source_override.as_deref(), "global")
    }

    pub fn credentials(&self) -> Option<aws_credential_types::Credentials> {
        static_credentials(&self.aws_access_key_id, &self.aws_secret_access_key)
    }
}

/// Fixed sleeps applied by the consumers, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackoffPolicy {
    /// After a failed iterator acquisition
    pub acquire: u64,
    /// After an empty batch
    pub idle: u64,
    /// After throttling or an unclassified source error
    pub throttle: u64,
    /// Before reacquiring an expired iterator
    pub expiry: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            acquire: 5000,
            idle: 100,
            throttle: 500,
            expiry: 100,
        }
    }
}

impl BackoffPolicy {
    pub fn acquire(&self) -> Duration {
        Duration::from_millis(self.acquire)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry)
    }
}

/// A configured source: either a sharded stream or a list of queues
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Stream(StreamSourceConfig),
    Queue(QueueSourceConfig),
}

impl SourceConfig {
    pub fn tag_name(&self) -> &str {
        match self {
            SourceConfig::Stream(s) => &s.tag_name,
            SourceConfig::Queue(q) => &q.tag_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamSourceConfig {
    pub stream_name: String,
    pub region: String,
    pub tag_name: String,
    /// Where to start a shard that has no checkpoint
    #[serde(default)]
    pub iterator_type: InitialPosition,
    /// Extract timestamps from payloads instead of using arrival times
    #[serde(default)]
    pub parse_time: bool,
    #[serde(default)]
    pub assume_local_timezone: bool,
    /// IANA zone for payload timestamps without an offset; wins over `assume-local-timezone`
    #[serde(default)]
    pub timezone_override: Option<String>,
    /// Seconds between metrics reports; 0 disables metrics
    #[serde(default)]
    pub metrics_interval: u64,
    #[serde(default)]
    pub json_metrics: bool,
    #[serde(default)]
    pub preprocessors: Vec<String>,
    #[serde(default = "default_stream_batch")]
    pub batch_size: i32,
}

fn default_stream_batch() -> i32 {
    5000
}

impl StreamSourceConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval)
    }

    /// Zone used for payload timestamps that carry no offset
    pub fn naive_timezone(&self) -> Result<NaiveTimezone> {
        match self.timezone_override.as_deref() {
            Some(name) if !name.is_empty() => {
                name.parse::<Tz>().map(NaiveTimezone::Named).map_err(|e| {
                    IngestError::config(format!(
                        "stream {} timezone-override \"{}\" is invalid: {}",
                        self.stream_name, name, e
                    ))
                })
            }
            _ if self.assume_local_timezone => Ok(NaiveTimezone::Local),
            _ => Ok(NaiveTimezone::Utc),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueSourceConfig {
    /// Queue URLs; each gets its own consumer
    pub queues: Vec<String>,
    pub region: String,
    pub tag_name: String,
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    /// Stamp entries with the local receive time instead of the queue's sent time
    #[serde(default)]
    pub ignore_timestamps: bool,
    #[serde(default)]
    pub source_override: Option<String>,
    #[serde(default)]
    pub preprocessors: Vec<String>,
    #[serde(default = "default_queue_batch")]
    pub max_messages: i32,
    /// Long-poll wait per receive, in seconds
    #[serde(default = "default_queue_wait")]
    pub wait_time: u64,
    #[serde(default)]
    pub metrics_interval: u64,
    #[serde(default)]
    pub json_metrics: bool,
}

fn default_queue_batch() -> i32 {
    MAX_QUEUE_BATCH
}

fn default_queue_wait() -> u64 {
    10
}

impl QueueSourceConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_time)
    }

    pub fn credentials(&self) -> Option<aws_credential_types::Credentials> {
        static_credentials(&self.aws_access_key_id, &self.aws_secret_access_key)
    }
}

fn static_credentials(
    akid: &Option<String>,
    secret: &Option<String>,
) -> Option<aws_credential_types::Credentials> {
    match (akid, secret) {
        (Some(akid), Some(secret)) if !akid.is_empty() => Some(
            aws_credential_types::Credentials::new(akid, secret, None, None, "stream-ingest-config"),
        ),
        _ => None,
    }
}

fn parse_source_override(value: Option<&str>, scope: &str) -> Result<Option<IpAddr>> {
    match value {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<IpAddr>().map(Some).map_err(|_| {
            IngestError::config(format!(
                "{} source override \"{}\" is not an IP address",
                scope, raw
            ))
        }),
    }
}

fn require(value: &str, field: &str, source: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(IngestError::config(format!(
            "source {} is missing {}",
            source, field
        )));
    }
    Ok(())
}

impl IngestConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: IngestConfig = serde_json::from_str(data)
            .map_err(|e| IngestError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&data)
    }

    /// Check required fields and ranges before anything is started
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(IngestError::config("no sources configured"));
        }
        if self.global.checkpoint_flush_interval == 0 {
            return Err(IngestError::config("checkpoint-flush-interval must be positive"));
        }
        self.global.source_address()?;

        for (name, source) in &self.sources {
            require(source.tag_name(), "tag-name", name)?;
            match source {
                SourceConfig::Stream(s) => {
                    require(&s.stream_name, "stream-name", name)?;
                    require(&s.region, "region", name)?;
                    if !(1..=MAX_STREAM_BATCH).contains(&s.batch_size) {
                        return Err(IngestError::config(format!(
                            "source {} batch-size {} outside 1..={}",
                            name, s.batch_size, MAX_STREAM_BATCH
                        )));
                    }
                    s.naive_timezone()?;
                }
                SourceConfig::Queue(q) => {
                    require(&q.region, "region", name)?;
                    if q.queues.is_empty() {
                        return Err(IngestError::config(format!(
                            "source {} has no queues",
                            name
                        )));
                    }
                    for url in &q.queues {
                        require(url, "queue URL", name)?;
                    }
                    if !(1..=MAX_QUEUE_BATCH).contains(&q.max_messages) {
                        return Err(IngestError::config(format!(
                            "source {} max-messages {} outside 1..={}",
                            name, q.max_messages, MAX_QUEUE_BATCH
                        )));
                    }
                    if q.wait_time > MAX_QUEUE_WAIT_SECS {
                        return Err(IngestError::config(format!(
                            "source {} wait-time exceeds {} seconds",
                            name, MAX_QUEUE_WAIT_SECS
                        )));
                    }
                    parse_source_override(q.source_override.as_deref(), name)?;
                }
            }
        }
        Ok(())
    }

    /// Source address for entries of a source; a queue's own override wins
    pub fn source_address_for(&self, source: &SourceConfig) -> Result<Option<IpAddr>> {
        if let SourceConfig::Queue(q) = source {
            if let Some(addr) = parse_source_override(q.source_override.as_deref(), "queue")? {
                return Ok(Some(addr));
            }
        }
        self.global.source_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "global": {
            "state-store-location": "/tmp/ingest.state",
            "source-override": "10.0.0.1",
            "backoff": { "acquire": 50 }
        },
        "sources": {
            "clicks": {
                "type": "stream",
                "stream-name": "clickstream",
                "region": "us-west-2",
                "tag-name": "clicks",
                "iterator-type": "LATEST",
                "parse-time": true,
                "metrics-interval": 60
            },
            "alerts": {
                "type": "queue",
                "queues": ["https://sqs.us-east-1.amazonaws.com/1/alerts"],
                "region": "us-east-1",
                "tag-name": "alerts",
                "source-override": "192.168.1.5"
            }
        }
    }"#;

    #[test]
    fn test_parse_sample_config() -> anyhow::Result<()> {
        let config = IngestConfig::from_json_str(SAMPLE)?;

        assert_eq!(config.global.state_store_location, PathBuf::from("/tmp/ingest.state"));
        assert_eq!(config.global.backoff.acquire, 50);
        assert_eq!(config.global.backoff.throttle, 500);
        assert_eq!(config.global.flush_interval(), Duration::from_secs(15));
        assert_eq!(config.global.grace_period(), Duration::from_secs(1));

        match &config.sources["clicks"] {
            SourceConfig::Stream(s) => {
                assert_eq!(s.iterator_type, InitialPosition::Latest);
                assert_eq!(s.batch_size, 5000);
                assert!(s.parse_time);
            }
            other => panic!("expected stream source, got {:?}", other),
        }
        match &config.sources["alerts"] {
            SourceConfig::Queue(q) => {
                assert_eq!(q.max_messages, 10);
                assert_eq!(q.wait(), Duration::from_secs(10));
                assert!(!q.ignore_timestamps);
            }
            other => panic!("expected queue source, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_source_override_precedence() -> anyhow::Result<()> {
        let config = IngestConfig::from_json_str(SAMPLE)?;

        let stream_addr = config.source_address_for(&config.sources["clicks"])?;
        assert_eq!(stream_addr, Some("10.0.0.1".parse()?));

        let queue_addr = config.source_address_for(&config.sources["alerts"])?;
        assert_eq!(queue_addr, Some("192.168.1.5".parse()?));
        Ok(())
    }

    #[test]
    fn test_rejects_missing_fields() {
        let err = IngestConfig::from_json_str(
            r#"{"sources": {"s": {"type": "stream", "stream-name": "", "region": "r", "tag-name": "t"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(ref m) if m.contains("stream-name")));

        let err = IngestConfig::from_json_str(
            r#"{"sources": {"q": {"type": "queue", "queues": [], "region": "r", "tag-name": "t"}}}"#,
        )
        .unwrap_err();
        assert!(err.is_fatal_at_startup());

        let err = IngestConfig::from_json_str(r#"{"sources": {}}"#).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_ranges_and_addresses() {
        let err = IngestConfig::from_json_str(
            r#"{"sources": {"s": {"type": "stream", "stream-name": "a", "region": "r", "tag-name": "t", "batch-size": 0}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch-size"));

        let err = IngestConfig::from_json_str(
            r#"{"sources": {"q": {"type": "queue", "queues": ["u"], "region": "r", "tag-name": "t", "source-override": "nope"}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not an IP address"));
    }

    #[test]
    fn test_static_credentials_require_both_parts() {
        let mut global = GlobalConfig::default();
        assert!(global.credentials().is_none());

        global.aws_access_key_id = Some("AKID".to_string());
        assert!(global.credentials().is_none());

        global.aws_secret_access_key = Some("secret".to_string());
        assert!(global.credentials().is_some());
    }

    fn stream_with(extra: &str) -> String {
        format!(
            r#"{{"sources": {{"s": {{"type": "stream", "stream-name": "app", "region": "r", "tag-name": "t"{}}}}}}}"#,
            extra
        )
    }

    #[test]
    fn test_timezone_override_resolution() -> anyhow::Result<()> {
        let config = IngestConfig::from_json_str(&stream_with(
            r#", "assume-local-timezone": true, "timezone-override": "Europe/Berlin""#,
        ))?;
        let SourceConfig::Stream(s) = &config.sources["s"] else {
            anyhow::bail!("expected stream source");
        };
        assert_eq!(
            s.naive_timezone()?,
            NaiveTimezone::Named(chrono_tz::Europe::Berlin)
        );

        let config =
            IngestConfig::from_json_str(&stream_with(r#", "assume-local-timezone": true"#))?;
        let SourceConfig::Stream(s) = &config.sources["s"] else {
            anyhow::bail!("expected stream source");
        };
        assert_eq!(s.naive_timezone()?, NaiveTimezone::Local);

        let config = IngestConfig::from_json_str(&stream_with(""))?;
        let SourceConfig::Stream(s) = &config.sources["s"] else {
            anyhow::bail!("expected stream source");
        };
        assert_eq!(s.naive_timezone()?, NaiveTimezone::Utc);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_timezone() {
        let err = IngestConfig::from_json_str(&stream_with(r#", "timezone-override": "Mars/Olympus""#))
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(ref m) if m.contains("timezone-override")));
        assert!(err.is_fatal_at_startup());
    }
}
