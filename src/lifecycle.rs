//! Startup, task supervision and two-stage shutdown
//!
//! [`IngestCoordinator::start`] does everything that can fail fatally (validation,
//! tag resolution, client setup, shard discovery) before the first task is
//! spawned. The returned [`RunningIngest`] owns every task handle and performs the
//! ordered drain on shutdown.

use crate::client::{connect_kinesis, PartitionDescriptor, StreamClientTrait};
use crate::config::{GlobalConfig, IngestConfig, QueueSourceConfig, SourceConfig, StreamSourceConfig};
use crate::entry::EntryTag;
use crate::error::{IngestError, Result};
use crate::monitoring::{MetricsReporter, SourceMetrics};
use crate::pipeline::{DefaultTimeExtractorFactory, Sink, TimeExtractorFactory};
use crate::queue::{connect_sqs, QueueClientTrait, QueueConsumer, QueueSettings};
use crate::retry::{FixedBackoff, RetryConfig, RetryHandle};
use crate::shard::{ShardConsumer, ShardSettings};
use crate::shutdown::ShutdownController;
use crate::store::{spawn_periodic_flush, CheckpointStore, FileCheckpointStore};
use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use crate::shutdown::ShutdownSignal;

/// Builds source clients for configured sources
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn stream_client(
        &self,
        source: &StreamSourceConfig,
        global: &GlobalConfig,
    ) -> Result<Arc<dyn StreamClientTrait>>;

    async fn queue_client(
        &self,
        source: &QueueSourceConfig,
        global: &GlobalConfig,
    ) -> Result<Arc<dyn QueueClientTrait>>;
}

/// Connects to Kinesis and SQS through the AWS SDK
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsConnector;

#[async_trait]
impl SourceConnector for AwsConnector {
    async fn stream_client(
        &self,
        source: &StreamSourceConfig,
        global: &GlobalConfig,
    ) -> Result<Arc<dyn StreamClientTrait>> {
        Ok(Arc::new(
            connect_kinesis(&source.region, global.credentials()).await,
        ))
    }

    async fn queue_client(
        &self,
        source: &QueueSourceConfig,
        global: &GlobalConfig,
    ) -> Result<Arc<dyn QueueClientTrait>> {
        let credentials = source.credentials().or_else(|| global.credentials());
        Ok(Arc::new(connect_sqs(&source.region, credentials).await))
    }
}

/// Everything needed to spawn the consumers of one source
enum SourcePlan {
    Stream {
        name: String,
        config: StreamSourceConfig,
        tag: EntryTag,
        source_address: Option<IpAddr>,
        client: Arc<dyn StreamClientTrait>,
        partitions: Vec<PartitionDescriptor>,
    },
    Queue {
        name: String,
        config: QueueSourceConfig,
        tag: EntryTag,
        source_address: Option<IpAddr>,
        client: Arc<dyn QueueClientTrait>,
    },
}

pub struct IngestCoordinator {
    config: IngestConfig,
    sink: Arc<dyn Sink>,
    store: Arc<dyn CheckpointStore>,
    connector: Arc<dyn SourceConnector>,
    time_extractors: Arc<dyn TimeExtractorFactory>,
}

impl IngestCoordinator {
    pub fn new(
        config: IngestConfig,
        sink: Arc<dyn Sink>,
        store: Arc<dyn CheckpointStore>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        Self {
            config,
            sink,
            store,
            connector,
            time_extractors: Arc::new(DefaultTimeExtractorFactory),
        }
    }

    /// AWS clients plus a file checkpoint store at the configured location
    pub fn with_aws(config: IngestConfig, sink: Arc<dyn Sink>) -> Result<Self> {
        let store = FileCheckpointStore::open(&config.global.state_store_location)?;
        Ok(Self::new(config, sink, Arc::new(store), Arc::new(AwsConnector)))
    }

    pub fn with_time_extractor_factory(mut self, factory: Arc<dyn TimeExtractorFactory>) -> Self {
        self.time_extractors = factory;
        self
    }

    /// Resolve, connect and discover every source, then spawn all tasks
    pub async fn start(self) -> Result<RunningIngest> {
        self.config.validate()?;
        let controller = ShutdownController::new();

        let mut plans = Vec::with_capacity(self.config.sources.len());
        for (name, source) in &self.config.sources {
            plans.push(self.plan_source(name, source, &controller.signal()).await?);
        }

        let mut running = RunningIngest {
            controller,
            consumers: Vec::new(),
            background: Vec::new(),
            store: self.store.clone(),
            sink: self.sink.clone(),
            grace: self.config.global.grace_period(),
        };

        for plan in plans {
            if let Err(e) = self.spawn_source(plan, &mut running) {
                running.shutdown().await?;
                return Err(e);
            }
        }

        running.background.push(spawn_periodic_flush(
            self.store.clone(),
            self.config.global.flush_interval(),
            running.controller.signal().done_receiver(),
        ));

        info!(
            sources = self.config.sources.len(),
            consumers = running.consumers.len(),
            "Ingest started"
        );
        Ok(running)
    }

    async fn plan_source(
        &self,
        name: &str,
        source: &SourceConfig,
        signal: &ShutdownSignal,
    ) -> Result<SourcePlan> {
        let tag = self
            .sink
            .resolve_tag(source.tag_name())
            .map_err(|_| IngestError::UnknownTag(source.tag_name().to_string()))?;
        let source_address = self.config.source_address_for(source)?;

        match source {
            SourceConfig::Stream(config) => {
                let client = self
                    .connector
                    .stream_client(config, &self.config.global)
                    .await?;
                let partitions =
                    discover(client.as_ref(), &config.stream_name, &self.config.global, signal)
                        .await?;
                info!(
                    source = %name,
                    stream = %config.stream_name,
                    shards = partitions.len(),
                    "Discovered shards"
                );
                Ok(SourcePlan::Stream {
                    name: name.to_string(),
                    config: config.clone(),
                    tag,
                    source_address,
                    client,
                    partitions,
                })
            }
            SourceConfig::Queue(config) => {
                let client = self
                    .connector
                    .queue_client(config, &self.config.global)
                    .await?;
                Ok(SourcePlan::Queue {
                    name: name.to_string(),
                    config: config.clone(),
                    tag,
                    source_address,
                    client,
                })
            }
        }
    }

    fn spawn_source(&self, plan: SourcePlan, running: &mut RunningIngest) -> Result<()> {
        let backoff = self.config.global.backoff;

        match plan {
            SourcePlan::Stream {
                name,
                config,
                tag,
                source_address,
                client,
                partitions,
            } => {
                let metrics_interval = config.metrics_interval();
                let metrics = SourceMetrics::new(!metrics_interval.is_zero());
                let zone = config.naive_timezone()?;
                let settings = ShardSettings {
                    tag,
                    source_address,
                    initial_position: config.iterator_type,
                    batch_size: config.batch_size,
                    backoff,
                };

                for partition in &partitions {
                    if partition.closed {
                        info!(
                            stream = %config.stream_name,
                            shard_id = %partition.id,
                            "Shard appears to be closed, skipping"
                        );
                        continue;
                    }

                    let processor = self
                        .sink
                        .new_processor_set(tag, &config.preprocessors)
                        .map_err(|e| {
                            IngestError::config(format!(
                                "source {}: preprocessor construction failed: {}",
                                name, e
                            ))
                        })?;
                    let mut consumer = ShardConsumer::new(
                        config.stream_name.clone(),
                        partition.id.clone(),
                        client.clone(),
                        self.store.clone(),
                        processor,
                        metrics.register(),
                        settings.clone(),
                        running.controller.signal(),
                    );
                    if config.parse_time {
                        match self.time_extractors.build(zone) {
                            Ok(extractor) => consumer = consumer.with_time_extractor(extractor),
                            Err(e) => warn!(
                                source = %name,
                                error = %e,
                                "Failed to build time extractor, using arrival timestamps"
                            ),
                        }
                    }

                    let label = format!("{}/{}", config.stream_name, partition.id);
                    let handle = tokio::spawn(async move {
                        consumer.run().await;
                        Ok::<_, IngestError>(())
                    });
                    running.consumers.push((label, handle));
                }

                if !metrics_interval.is_zero() {
                    let reporter = MetricsReporter::new(
                        config.stream_name.clone(),
                        metrics,
                        metrics_interval,
                        config.json_metrics,
                    )
                    .with_partition_count(partitions.len());
                    running
                        .background
                        .push(reporter.spawn(running.controller.signal().done_receiver()));
                }
            }
            SourcePlan::Queue {
                name,
                config,
                tag,
                source_address,
                client,
            } => {
                let metrics_interval = config.metrics_interval();
                let metrics = SourceMetrics::new(!metrics_interval.is_zero());
                let settings = QueueSettings {
                    tag,
                    source_address,
                    ignore_timestamps: config.ignore_timestamps,
                    max_messages: config.max_messages,
                    wait: config.wait(),
                    backoff,
                };

                for queue_url in &config.queues {
                    let processor = self
                        .sink
                        .new_processor_set(tag, &config.preprocessors)
                        .map_err(|e| {
                            IngestError::config(format!(
                                "source {}: preprocessor construction failed: {}",
                                name, e
                            ))
                        })?;
                    let consumer = QueueConsumer::new(
                        queue_url.clone(),
                        client.clone(),
                        processor,
                        metrics.register(),
                        settings.clone(),
                        running.controller.signal(),
                    );
                    running
                        .consumers
                        .push((queue_url.clone(), tokio::spawn(consumer.run())));
                }

                if !metrics_interval.is_zero() {
                    let reporter =
                        MetricsReporter::new(name, metrics, metrics_interval, config.json_metrics);
                    running
                        .background
                        .push(reporter.spawn(running.controller.signal().done_receiver()));
                }
            }
        }
        Ok(())
    }
}

/// Startup gives up on a stream whose shards cannot be listed after this many attempts
const DISCOVERY_ATTEMPTS: u32 = 5;

/// List a stream's shards with a bounded number of attempts
async fn discover(
    client: &dyn StreamClientTrait,
    stream_name: &str,
    global: &GlobalConfig,
    signal: &ShutdownSignal,
) -> Result<Vec<PartitionDescriptor>> {
    let mut retry = RetryHandle::new(
        RetryConfig {
            max_retries: Some(DISCOVERY_ATTEMPTS),
        },
        FixedBackoff::new(global.backoff.acquire()),
    );
    let mut done = signal.done_receiver();

    retry
        .retry(|| client.discover_partitions(stream_name), &mut done)
        .await
        .map_err(|e| {
            if e.is_interrupted() {
                IngestError::Shutdown
            } else {
                IngestError::Discovery {
                    source_id: stream_name.to_string(),
                    message: e.to_string(),
                }
            }
        })
}

/// Outcome of a completed shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub joined: usize,
    /// Consumers that ended with an error or panicked
    pub failed: usize,
}

/// Handles of a started ingest
pub struct RunningIngest {
    controller: ShutdownController,
    consumers: Vec<(String, JoinHandle<Result<()>>)>,
    background: Vec<JoinHandle<()>>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn Sink>,
    grace: Duration,
}

impl RunningIngest {
    /// Number of spawned partition and queue consumers
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.controller.signal()
    }

    /// Run until `quit` resolves, then shut down
    pub async fn run_until<F>(self, quit: F) -> Result<ShutdownSummary>
    where
        F: Future<Output = ()>,
    {
        quit.await;
        self.shutdown().await
    }

    /// Stop every task, join them, then drain the store and the sink
    pub async fn shutdown(self) -> Result<ShutdownSummary> {
        let RunningIngest {
            controller,
            consumers,
            background,
            store,
            sink,
            grace,
        } = self;

        controller.request_stop();
        let timer = controller.cancel_after(grace);

        let (labels, handles): (Vec<_>, Vec<_>) = consumers.into_iter().unzip();
        let results = join_all(handles).await;

        let mut summary = ShutdownSummary::default();
        for (label, result) in labels.iter().zip(results) {
            summary.joined += 1;
            match result {
                Ok(Ok(())) => debug!(consumer = %label, "Consumer joined"),
                Ok(Err(e)) => {
                    summary.failed += 1;
                    error!(consumer = %label, error = %e, "Consumer ended with error");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(consumer = %label, error = %e, "Consumer task panicked");
                }
            }
        }

        for result in join_all(background).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
        }
        timer.abort();

        if let Err(e) = store.close().await {
            error!(error = %e, "Failed to flush checkpoint state on shutdown");
        }
        if let Err(e) = sink.sync(grace).await {
            error!(error = %e, "Failed to sync sink");
        }
        if let Err(e) = sink.close().await {
            error!(error = %e, "Failed to close sink");
        }

        info!(
            joined = summary.joined,
            failed = summary.failed,
            "Ingest shut down"
        );
        Ok(summary)
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn wait_for_quit() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Quit signal received");
}
