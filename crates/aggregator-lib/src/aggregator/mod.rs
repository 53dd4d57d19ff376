//! Flow aggregation and query engine
//!
//! This module provides:
//! - Deduplication of retransmitted updates
//! - The sharded bucket store
//! - Rollup list queries, live streams and filter hints over the store
//! - Periodic eviction of aged-out data

pub mod dedup;
pub mod eviction;
pub mod hints;
pub mod rollup;
pub mod series;
pub mod store;
pub mod stream;


pub use dedup::{payload_hash, DedupCache, DedupConfig};
pub use eviction::{EvictionConfig, EvictionLoop};
pub use hints::{HintField, HintIndex, HintsRequest, HintsResponse};
pub use rollup::{ListRequest, ListResponse, RollupEngine, SortBy};
pub use series::{Bucket, MergeOutcome};
pub use store::{EvictionStats, FlowStore, Scan, SeriesSnapshot, StoreConfig};
pub use stream::{FlowStream, StreamConfig, StreamPublisher, StreamRequest};

use crate::error::FlowError;
use crate::observability::{AggregatorMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Totals from one eviction pass over the store and dedup cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub store: EvictionStats,
    pub dedup_purged: usize,
}

/// Query side of the aggregator, shared by the HTTP API and the eviction loop
#[derive(Debug, Clone)]
pub struct Aggregator {
    store: Arc<FlowStore>,
    dedup: Arc<DedupCache>,
    rollup: RollupEngine,
    hints: HintIndex,
    publisher: StreamPublisher,
    metrics: AggregatorMetrics,
}

impl Aggregator {
    pub fn new(
        store: Arc<FlowStore>,
        dedup: Arc<DedupCache>,
        stream_config: StreamConfig,
        metrics: AggregatorMetrics,
        logger: StructuredLogger,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            rollup: RollupEngine::new(store.clone()),
            hints: HintIndex::new(store.clone()),
            publisher: StreamPublisher::new(store.clone(), stream_config, logger, shutdown),
            store,
            dedup,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<FlowStore> {
        &self.store
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    /// Rolled-up, sorted and paginated flows
    pub fn list(&self, request: &ListRequest) -> Result<ListResponse, FlowError> {
        let started = Instant::now();
        let response = self.rollup.list(request);
        self.metrics
            .observe_list_latency(started.elapsed().as_secs_f64());
        response
    }

    /// Open a live subscription over completed windows
    pub fn stream(&self, request: StreamRequest) -> Result<FlowStream, FlowError> {
        let stream = self.publisher.open(request)?;
        self.metrics
            .set_active_streams(self.publisher.active_streams());
        Ok(stream)
    }

    pub fn hints(&self, request: &HintsRequest) -> Result<HintsResponse, FlowError> {
        self.hints.hints(request)
    }

    pub fn active_streams(&self) -> usize {
        self.publisher.active_streams()
    }

    /// Age out store buckets, idle series and dedup entries
    pub fn evict(&self) -> EvictionReport {
        let now = self.store.clock().now();
        let report = EvictionReport {
            store: self.store.evict(now),
            dedup_purged: self.dedup.purge(now),
        };
        self.metrics
            .add_evicted_series(report.store.series_evicted);
        self.refresh_gauges();
        report
    }

    /// Copy current sizes into the Prometheus gauges
    pub fn refresh_gauges(&self) {
        self.metrics.set_store_size(
            self.store.len(),
            self.store.bucket_count(),
            self.dedup.len(),
        );
        self.metrics
            .set_active_streams(self.publisher.active_streams());
    }
}
