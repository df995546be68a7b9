use anyhow::Result;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;
use stream_ingest::config::SourceConfig;
use stream_ingest::{IngestConfig, IngestError, InitialPosition};
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_load_from_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"{{
            "global": {{ "shutdown-grace-period": 250 }},
            "sources": {{
                "firehose": {{
                    "type": "stream",
                    "stream-name": "app-logs",
                    "region": "eu-west-1",
                    "tag-name": "applogs",
                    "batch-size": 1000,
                    "json-metrics": true,
                    "metrics-interval": 30,
                    "preprocessors": ["gunzip"]
                }}
            }}
        }}"#
    )?;

    let config = IngestConfig::load(file.path())?;
    assert_eq!(config.global.grace_period(), Duration::from_millis(250));
    assert_eq!(config.global.checkpoint_flush_interval, 15);

    let source = &config.sources["firehose"];
    assert_eq!(source.tag_name(), "applogs");
    match source {
        SourceConfig::Stream(s) => {
            assert_eq!(s.preprocessors, vec!["gunzip".to_string()]);
            assert_eq!(s.metrics_interval(), Duration::from_secs(30));
            assert!(s.json_metrics);
            assert_eq!(s.batch_size, 1000);
            assert_eq!(s.iterator_type, InitialPosition::TrimHorizon);
        }
        other => anyhow::bail!("unexpected source {:?}", other),
    }
    Ok(())
}

#[test]
fn test_load_missing_file_is_config_error() {
    let err = IngestConfig::load("/nonexistent/stream-ingest.json").unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));
    assert!(err.is_fatal_at_startup());
}

#[test]
fn test_queue_limits_enforced() {
    let err = IngestConfig::from_json_str(
        r#"{"sources": {"q": {"type": "queue", "queues": ["u"], "region": "r", "tag-name": "t", "wait-time": 30}}}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("wait-time"));

    let err = IngestConfig::from_json_str(
        r#"{"sources": {"q": {"type": "queue", "queues": ["u"], "region": "r", "tag-name": "t", "max-messages": 11}}}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("max-messages"));
}

#[test]
fn test_unknown_source_type_rejected() {
    let err = assert_err!(IngestConfig::from_json_str(
        r#"{"sources": {"x": {"type": "kafka", "region": "r", "tag-name": "t"}}}"#,
    ));
    assert!(matches!(err, IngestError::Config(_)));

    let config = assert_ok!(IngestConfig::from_json_str(
        r#"{"sources": {"x": {"type": "queue", "queues": ["u"], "region": "r", "tag-name": "t"}}}"#,
    ));
    assert_eq!(config.sources.len(), 1);
}
