//! Observability infrastructure for the flow aggregator
//!
//! Provides:
//! - Prometheus metrics (ingestion outcomes, store size, query latency, streams)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AggregatorMetricsInner> = OnceLock::new();

struct AggregatorMetricsInner {
    updates_total: IntCounterVec,
    malformed_updates_total: IntCounter,
    series: IntGauge,
    buckets: IntGauge,
    dedup_entries: IntGauge,
    list_latency_seconds: Histogram,
    active_streams: IntGauge,
    connected_nodes: IntGauge,
    evicted_series_total: IntCounter,
}

impl AggregatorMetricsInner {
    fn new() -> Self {
        Self {
            updates_total: register_int_counter_vec!(
                "flow_aggregator_updates_total",
                "Flow updates received, by ingestion outcome",
                &["outcome"]
            )
            .expect("Failed to register updates_total"),

            malformed_updates_total: register_int_counter!(
                "flow_aggregator_malformed_updates_total",
                "Flow updates dropped because their key was incomplete"
            )
            .expect("Failed to register malformed_updates_total"),

            series: register_int_gauge!(
                "flow_aggregator_series",
                "Number of flow keys with a live series"
            )
            .expect("Failed to register series"),

            buckets: register_int_gauge!(
                "flow_aggregator_buckets",
                "Number of 15 second buckets held across all series"
            )
            .expect("Failed to register buckets"),

            dedup_entries: register_int_gauge!(
                "flow_aggregator_dedup_entries",
                "Entries held by the update deduplication cache"
            )
            .expect("Failed to register dedup_entries"),

            list_latency_seconds: register_histogram!(
                "flow_aggregator_list_latency_seconds",
                "Time spent answering list queries",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register list_latency_seconds"),

            active_streams: register_int_gauge!(
                "flow_aggregator_active_streams",
                "Open stream subscriptions"
            )
            .expect("Failed to register active_streams"),

            connected_nodes: register_int_gauge!(
                "flow_aggregator_connected_nodes",
                "Nodes with an open ingestion stream"
            )
            .expect("Failed to register connected_nodes"),

            evicted_series_total: register_int_counter!(
                "flow_aggregator_evicted_series_total",
                "Series removed after their retention and grace period"
            )
            .expect("Failed to register evicted_series_total"),
        }
    }
}

/// Aggregator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Debug, Clone)]
pub struct AggregatorMetrics {
    _private: (),
}

impl Default for AggregatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AggregatorMetricsInner {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new)
    }

    /// Count one update by outcome (applied, duplicate, dropped_late, invalid, malformed)
    pub fn inc_update(&self, outcome: &str) {
        self.inner()
            .updates_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_malformed(&self) {
        self.inner().malformed_updates_total.inc();
        self.inc_update("malformed");
    }

    /// Update store and cache size gauges
    pub fn set_store_size(&self, series: usize, buckets: usize, dedup_entries: usize) {
        self.inner().series.set(series as i64);
        self.inner().buckets.set(buckets as i64);
        self.inner().dedup_entries.set(dedup_entries as i64);
    }

    pub fn observe_list_latency(&self, duration_secs: f64) {
        self.inner().list_latency_seconds.observe(duration_secs);
    }

    pub fn set_active_streams(&self, count: usize) {
        self.inner().active_streams.set(count as i64);
    }

    pub fn node_connected(&self) {
        self.inner().connected_nodes.inc();
    }

    pub fn node_disconnected(&self) {
        self.inner().connected_nodes.dec();
    }

    pub fn add_evicted_series(&self, count: usize) {
        self.inner().evicted_series_total.inc_by(count as u64);
    }
}

/// Structured logger for aggregator lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log aggregator startup
    pub fn log_startup(&self, version: &str, grpc_port: u16, api_port: u16) {
        info!(
            event = "aggregator_started",
            node = %self.node_name,
            aggregator_version = %version,
            grpc_port = grpc_port,
            api_port = api_port,
            "Flow aggregator started"
        );
    }

    /// Log aggregator shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "aggregator_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Flow aggregator shutting down"
        );
    }

    pub fn log_node_connected(&self, reporting_node: &str) {
        info!(
            event = "node_connected",
            node = %self.node_name,
            reporting_node = %reporting_node,
            "Node opened ingestion stream"
        );
    }

    /// Log the end of a node's ingestion stream
    pub fn log_node_disconnected(&self, reporting_node: &str, updates: u64, error: Option<&str>) {
        match error {
            Some(error) => warn!(
                event = "node_disconnected",
                node = %self.node_name,
                reporting_node = %reporting_node,
                updates = updates,
                error = %error,
                "Node ingestion stream failed"
            ),
            None => info!(
                event = "node_disconnected",
                node = %self.node_name,
                reporting_node = %reporting_node,
                updates = updates,
                "Node closed ingestion stream"
            ),
        }
    }

    pub fn log_eviction(&self, buckets_evicted: usize, series_evicted: usize, dedup_purged: usize) {
        info!(
            event = "eviction_completed",
            node = %self.node_name,
            buckets_evicted = buckets_evicted,
            series_evicted = series_evicted,
            dedup_purged = dedup_purged,
            "Eviction pass completed"
        );
    }

    pub fn log_stream_opened(&self, first_window: i64, active_streams: usize) {
        info!(
            event = "stream_opened",
            node = %self.node_name,
            first_window = first_window,
            active_streams = active_streams,
            "Stream subscription opened"
        );
    }

    pub fn log_stream_closed(&self, reason: &str, next_window: i64) {
        info!(
            event = "stream_closed",
            node = %self.node_name,
            reason = %reason,
            next_window = next_window,
            "Stream subscription closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_metrics_creation() {
        let metrics = AggregatorMetrics::new();
        let other = AggregatorMetrics::new();

        metrics.inc_update("applied");
        metrics.inc_malformed();
        metrics.set_store_size(3, 10, 12);
        metrics.observe_list_latency(0.002);
        metrics.set_active_streams(1);
        other.node_connected();
        other.node_disconnected();
        metrics.add_evicted_series(2);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "flow_aggregator_updates_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
