use serde::Serialize;
use std::fmt;

/// Values drained from one sample by [`ShardMetrics::read_and_reset`](super::ShardMetrics::read_and_reset)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Last reported distance behind the head of the source, in milliseconds
    pub lag_millis: i64,
    pub bytes_read: u64,
    pub bytes_emitted: u64,
    pub requests: u64,
}

/// One aggregated report per source and interval
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricsReport {
    pub source_name: String,
    pub partition_count: usize,
    /// Mean of the per-partition lag estimates
    pub average_lag: i64,
    /// Raw bytes read from the source
    pub compressed_data_size: u64,
    /// Bytes of entries handed to the pipeline
    pub entry_data_size: u64,
    pub requests: u64,
}

impl MetricsReport {
    /// Reduce drained samples: lag is averaged, counters are summed
    pub fn from_snapshots(
        source_name: impl Into<String>,
        partition_count: usize,
        snapshots: &[MetricsSnapshot],
    ) -> Self {
        let mut report = MetricsReport {
            source_name: source_name.into(),
            partition_count,
            ..Default::default()
        };

        let mut total_lag = 0i64;
        for snap in snapshots {
            total_lag = total_lag.saturating_add(snap.lag_millis);
            report.compressed_data_size += snap.bytes_read;
            report.entry_data_size += snap.bytes_emitted;
            report.requests += snap.requests;
        }
        if !snapshots.is_empty() {
            report.average_lag = total_lag / snapshots.len() as i64;
        }
        report
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Source {}: {} partitions, avg {} ms behind latest. Since last update: {} bytes read in {} requests, {} bytes processed",
            self.source_name,
            self.partition_count,
            self.average_lag,
            self.compressed_data_size,
            self.requests,
            self.entry_data_size
        )
    }
}
