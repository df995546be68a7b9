//! Throughput and lag metrics for consumer tasks
//!
//! Every shard or queue consumer owns a [`ShardMetrics`] sample. A
//! [`MetricsReporter`] per source drains all samples of that source on a fixed
//! timer and logs one [`MetricsReport`].

mod metrics;
mod types;

pub use metrics::{MetricsReporter, ShardMetrics, SourceMetrics};
pub use types::{MetricsReport, MetricsSnapshot};
