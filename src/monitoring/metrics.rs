use super::types::{MetricsReport, MetricsSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Sample {
    disabled: bool,
    lag_millis: i64,
    bytes_read: u64,
    bytes_emitted: u64,
    requests: u64,
}

/// Mutable counters owned by a single shard or queue consumer
#[derive(Debug, Default)]
pub struct ShardMetrics {
    sample: Mutex<Sample>,
}

impl ShardMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            sample: Mutex::new(Sample {
                disabled: !enabled,
                ..Default::default()
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.sample.lock().disabled
    }

    /// Account for one completed source request
    ///
    /// A missing lag value keeps the previous estimate. No-op when disabled.
    pub fn update(&self, lag_millis: Option<i64>, bytes_read: usize, bytes_emitted: usize) {
        let mut sample = self.sample.lock();
        if sample.disabled {
            return;
        }
        if let Some(lag) = lag_millis {
            sample.lag_millis = lag;
        }
        sample.requests += 1;
        sample.bytes_read += bytes_read as u64;
        sample.bytes_emitted += bytes_emitted as u64;
    }

    /// Drain the counters; the lag estimate is kept as the last known value
    pub fn read_and_reset(&self) -> MetricsSnapshot {
        let mut sample = self.sample.lock();
        let snapshot = MetricsSnapshot {
            lag_millis: sample.lag_millis,
            bytes_read: sample.bytes_read,
            bytes_emitted: sample.bytes_emitted,
            requests: sample.requests,
        };
        sample.bytes_read = 0;
        sample.bytes_emitted = 0;
        sample.requests = 0;
        snapshot
    }
}

/// The samples of every consumer belonging to one source
#[derive(Debug, Clone)]
pub struct SourceMetrics {
    enabled: bool,
    samples: Arc<Mutex<Vec<Arc<ShardMetrics>>>>,
}

impl SourceMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a sample for a new consumer of this source
    pub fn register(&self) -> Arc<ShardMetrics> {
        let sample = Arc::new(ShardMetrics::new(self.enabled));
        self.samples.lock().push(sample.clone());
        sample
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read and reset every registered sample
    pub fn drain(&self) -> Vec<MetricsSnapshot> {
        let samples = self.samples.lock().clone();
        samples.iter().map(|s| s.read_and_reset()).collect()
    }
}

/// Periodically reduces and logs the metrics of one source
pub struct MetricsReporter {
    source_name: String,
    metrics: SourceMetrics,
    interval: Duration,
    json: bool,
    /// Reported partition count when it differs from the number of samples
    partition_count: Option<usize>,
}

impl MetricsReporter {
    pub fn new(
        source_name: impl Into<String>,
        metrics: SourceMetrics,
        interval: Duration,
        json: bool,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            metrics,
            interval,
            json,
            partition_count: None,
        }
    }

    /// Report `count` partitions, e.g. including closed shards that have no sample
    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.partition_count = Some(count);
        self
    }

    /// Drain all samples into a single report
    pub fn report(&self) -> MetricsReport {
        let snapshots = self.metrics.drain();
        let count = self.partition_count.unwrap_or(snapshots.len());
        MetricsReport::from_snapshots(&self.source_name, count, &snapshots)
    }

    fn emit(&self, report: &MetricsReport) {
        if self.json {
            match serde_json::to_string(report) {
                Ok(json) => info!(source = %self.source_name, "{}", json),
                Err(e) => warn!(source = %self.source_name, error = %e, "Failed to encode metrics report"),
            }
        } else {
            info!(
                source = %self.source_name,
                partitions = report.partition_count,
                average_lag_ms = report.average_lag,
                bytes_read = report.compressed_data_size,
                bytes_emitted = report.entry_data_size,
                requests = report.requests,
                "{}",
                report
            );
        }
    }

    /// Report every interval until the done channel fires
    pub async fn run(self, mut done: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.report();
                    self.emit(&report);
                }
                _ = done.changed() => {
                    debug!(source = %self.source_name, "Metrics reporter stopping");
                    return;
                }
            }
        }
    }

    pub fn spawn(self, done: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(done))
    }
}
