// Shared setup for the consumer scenario tests
use crate::client::InitialPosition;
use crate::entry::EntryTag;
use crate::monitoring::ShardMetrics;
use crate::queue::{QueueConsumer, QueueSettings};
use crate::shard::{ShardConsumer, ShardSettings};
use crate::shutdown::ShutdownController;
use crate::test::mocks::{MockCheckpointStore, MockQueueClient, MockSink, MockStreamClient};
use crate::test::TestUtils;
use std::sync::{Arc, Once};
use std::time::Duration;

pub const STREAM: &str = "test-stream";
pub const QUEUE: &str = "https://sqs.us-east-1.amazonaws.com/123456789012/test-queue";

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("stream_ingest=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

pub fn shard_settings() -> ShardSettings {
    ShardSettings {
        tag: EntryTag(7),
        source_address: None,
        initial_position: InitialPosition::TrimHorizon,
        batch_size: 100,
        backoff: TestUtils::fast_backoff(),
    }
}

pub fn queue_settings() -> QueueSettings {
    QueueSettings {
        tag: EntryTag(9),
        source_address: Some("10.1.2.3".parse().unwrap()),
        ignore_timestamps: false,
        max_messages: 10,
        wait: Duration::from_millis(50),
        backoff: TestUtils::fast_backoff(),
    }
}

/// Mocks plus the shutdown controller shared by one scenario
pub struct TestContext {
    pub client: MockStreamClient,
    pub queue_client: MockQueueClient,
    pub store: MockCheckpointStore,
    pub sink: MockSink,
    pub controller: ShutdownController,
    pub metrics: Arc<ShardMetrics>,
}

impl TestContext {
    pub fn new() -> Self {
        init_logging();
        Self {
            client: MockStreamClient::new(),
            queue_client: MockQueueClient::new(),
            store: MockCheckpointStore::new(),
            sink: MockSink::new(),
            controller: ShutdownController::new(),
            metrics: Arc::new(ShardMetrics::new(true)),
        }
    }

    pub fn shard_consumer(&self, shard_id: &str) -> ShardConsumer {
        self.shard_consumer_with(shard_id, shard_settings())
    }

    pub fn shard_consumer_with(&self, shard_id: &str, settings: ShardSettings) -> ShardConsumer {
        ShardConsumer::new(
            STREAM,
            shard_id,
            Arc::new(self.client.clone()),
            Arc::new(self.store.clone()),
            self.sink.processor(),
            self.metrics.clone(),
            settings,
            self.controller.signal(),
        )
    }

    pub fn queue_consumer(&self, settings: QueueSettings) -> QueueConsumer {
        QueueConsumer::new(
            QUEUE,
            Arc::new(self.queue_client.clone()),
            self.sink.processor(),
            self.metrics.clone(),
            settings,
            self.controller.signal(),
        )
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            anyhow::bail!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
