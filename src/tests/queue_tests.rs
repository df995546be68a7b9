use crate::client::SourceError;
use crate::error::IngestError;
use crate::queue::{QueueMessage, SENT_TIMESTAMP_ATTRIBUTE};
use crate::test::TestUtils;
use crate::tests::common::{queue_settings, wait_until, TestContext, QUEUE};
use anyhow::Result;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test]
async fn test_missing_timestamp_attribute_still_emits() -> Result<()> {
    let ctx = TestContext::new();
    let sent = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    ctx.queue_client.mock_receive(
        QUEUE,
        Ok(vec![
            TestUtils::create_queue_message("first", sent),
            QueueMessage::new("second"),
        ]),
    );

    let handle = tokio::spawn(ctx.queue_consumer(queue_settings()).run());
    wait_until(Duration::from_secs(2), || ctx.sink.entries().len() == 2).await?;

    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    let entries = ctx.sink.entries();
    assert_eq!(ctx.sink.payloads(), vec!["first", "second"]);
    assert_eq!(entries[0].timestamp, Some(sent));
    assert_eq!(entries[1].timestamp, None);
    assert_eq!(entries[0].tag.0, 9);
    assert_eq!(entries[1].source_address, Some("10.1.2.3".parse()?));
    assert_eq!(
        ctx.queue_client.requested_attributes()[0],
        vec![SENT_TIMESTAMP_ATTRIBUTE.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_unparsable_timestamp_leaves_entry_unstamped() -> Result<()> {
    let ctx = TestContext::new();
    ctx.queue_client.mock_receive(
        QUEUE,
        Ok(vec![
            QueueMessage::new("odd").with_attribute(SENT_TIMESTAMP_ATTRIBUTE, "yesterday")
        ]),
    );

    let handle = tokio::spawn(ctx.queue_consumer(queue_settings()).run());
    wait_until(Duration::from_secs(2), || ctx.sink.entries().len() == 1).await?;

    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    assert_eq!(ctx.sink.entries()[0].timestamp, None);
    Ok(())
}

#[tokio::test]
async fn test_ignore_timestamps_uses_receive_time() -> Result<()> {
    let ctx = TestContext::new();
    let sent = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    ctx.queue_client
        .mock_receive(QUEUE, Ok(vec![TestUtils::create_queue_message("old", sent)]));

    let mut settings = queue_settings();
    settings.ignore_timestamps = true;
    let before = Utc::now();

    let handle = tokio::spawn(ctx.queue_consumer(settings).run());
    wait_until(Duration::from_secs(2), || ctx.sink.entries().len() == 1).await?;

    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    let ts = ctx.sink.entries()[0].timestamp.expect("timestamp set");
    assert!(ts >= before);
    assert!(ctx.queue_client.requested_attributes()[0].is_empty());
    Ok(())
}

#[tokio::test]
async fn test_processor_failure_aborts_queue() -> Result<()> {
    let ctx = TestContext::new();
    ctx.sink.fail_processing(true);
    ctx.queue_client
        .mock_receive(QUEUE, Ok(vec![QueueMessage::new("a"), QueueMessage::new("b")]));

    // no stop request: the failure ends the task
    let handle = tokio::spawn(ctx.queue_consumer(queue_settings()).run());
    let result = tokio::time::timeout(Duration::from_secs(2), handle).await??;

    assert!(matches!(result, Err(IngestError::Pipeline(_))));
    assert_eq!(ctx.queue_client.receive_count(), 1);
    assert_eq!(ctx.sink.closed_processor_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_receive_errors_are_retried() -> Result<()> {
    let ctx = TestContext::new();
    ctx.queue_client
        .mock_receive(QUEUE, Err(SourceError::Other("OverLimit".to_string())));
    ctx.queue_client
        .mock_receive(QUEUE, Ok(vec![QueueMessage::new("after error")]));

    let handle = tokio::spawn(ctx.queue_consumer(queue_settings()).run());
    wait_until(Duration::from_secs(2), || ctx.sink.entries().len() == 1).await?;

    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    assert!(ctx.queue_client.receive_count() >= 2);
    Ok(())
}

#[tokio::test]
async fn test_stop_wakes_blocked_receive() -> Result<()> {
    let ctx = TestContext::new();
    let mut settings = queue_settings();
    settings.wait = Duration::from_secs(20);

    let handle = tokio::spawn(ctx.queue_consumer(settings).run());
    wait_until(Duration::from_secs(2), || ctx.queue_client.receive_count() == 1).await?;

    let start = Instant::now();
    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(ctx.sink.closed_processor_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_queue_lag_from_newest_message() -> Result<()> {
    let ctx = TestContext::new();
    let now = Utc::now();
    ctx.queue_client.mock_receive(
        QUEUE,
        Ok(vec![
            TestUtils::create_queue_message("older", now - chrono::Duration::seconds(60)),
            TestUtils::create_queue_message("newer", now - chrono::Duration::seconds(5)),
        ]),
    );

    let handle = tokio::spawn(ctx.queue_consumer(queue_settings()).run());
    wait_until(Duration::from_secs(2), || ctx.sink.entries().len() == 2).await?;

    ctx.controller.request_stop();
    tokio::time::timeout(Duration::from_secs(2), handle).await???;

    let snapshot = ctx.metrics.read_and_reset();
    assert!(snapshot.lag_millis >= 5_000);
    assert!(snapshot.lag_millis < 60_000);
    assert_eq!(snapshot.bytes_read, 10);
    Ok(())
}
