//! Sharded in-memory aggregation store
//!
//! Series live in a `DashMap` keyed by flow key, so merges to unrelated keys
//! land in different shards. Scans copy series references under the shard
//! read locks and then read each series' bucket snapshot without holding any
//! map lock.

use super::series::{Bucket, MergeOutcome, Series};
use crate::clock::SharedClock;
use crate::error::FlowError;
use crate::filter::Filter;
use crate::models::{align_down, is_aligned, FlowId, FlowKey, FlowStats, BUCKET_WIDTH_SECS};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Configuration for the aggregation store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Buckets kept per series (default: 240, one hour)
    pub retention_buckets: usize,
    /// How long an empty series survives without updates (seconds)
    pub grace_period_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention_buckets: 240,
            grace_period_secs: 60,
        }
    }
}

impl StoreConfig {
    /// Oldest bucket start still retained at `now`
    pub fn horizon(&self, now: i64) -> i64 {
        let kept = self.retention_buckets.max(1) as i64;
        align_down(now) - (kept - 1) * BUCKET_WIDTH_SECS
    }
}

/// Totals from one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub buckets_evicted: usize,
    pub series_evicted: usize,
}

/// Aggregated buckets for every observed flow key
#[derive(Debug)]
pub struct FlowStore {
    config: StoreConfig,
    clock: SharedClock,
    series: DashMap<FlowKey, Arc<Series>>,
}

impl FlowStore {
    pub fn new(config: StoreConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            series: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Add `stats` into the bucket of `key` starting at `bucket_start`
    pub fn merge_update(
        &self,
        key: &FlowKey,
        bucket_start: i64,
        stats: &FlowStats,
    ) -> Result<MergeOutcome, FlowError> {
        if !is_aligned(bucket_start) {
            return Err(FlowError::InvalidInterval(format!(
                "bucket start {} is not a multiple of {}s",
                bucket_start, BUCKET_WIDTH_SECS
            )));
        }

        let now = self.clock.now();
        let horizon = self.config.horizon(now);
        if bucket_start < horizon {
            return Ok(MergeOutcome::DroppedLate);
        }

        loop {
            let series = self.series_for(key, now);
            if let Some(outcome) = series.merge(
                bucket_start,
                stats,
                horizon,
                self.config.retention_buckets.max(1),
                now,
            ) {
                return Ok(outcome);
            }
            // Retired between lookup and merge; drop the stale entry and retry
            self.series
                .remove_if(key, |_, current| Arc::ptr_eq(current, &series));
        }
    }

    fn series_for(&self, key: &FlowKey, now: i64) -> Arc<Series> {
        if let Some(existing) = self.series.get(key) {
            return existing.value().clone();
        }
        self.series
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Series::new(key.clone(), now)))
            .value()
            .clone()
    }

    /// Series with at least one bucket starting in `[low, high)` whose key matches `filter`
    pub fn scan(&self, low: i64, high: i64, filter: &Filter) -> Scan {
        let candidates: Vec<Arc<Series>> =
            self.series.iter().map(|entry| entry.value().clone()).collect();

        let mut entries = Vec::new();
        for series in candidates {
            if !filter.matches(series.key()) {
                continue;
            }
            let buckets = series.snapshot();
            let from = buckets.partition_point(|b| b.start < low);
            let to = buckets.partition_point(|b| b.start < high);
            if from < to {
                entries.push(SeriesSnapshot {
                    series,
                    buckets,
                    range: from..to,
                });
            }
        }
        Scan {
            entries: Arc::new(entries),
            position: 0,
        }
    }

    /// Drop buckets past the retention horizon and series idle past the grace period
    pub fn evict(&self, now: i64) -> EvictionStats {
        let horizon = self.config.horizon(now);
        let grace = self.config.grace_period_secs;
        let mut stats = EvictionStats::default();

        let candidates: Vec<Arc<Series>> =
            self.series.iter().map(|entry| entry.value().clone()).collect();

        for series in candidates {
            stats.buckets_evicted += series.evict_before(horizon);
            if self
                .series
                .remove_if(series.key(), |_, current| {
                    Arc::ptr_eq(current, &series) && current.retire_if_idle(now, grace)
                })
                .is_some()
            {
                stats.series_evicted += 1;
            }
        }

        debug!(
            buckets_evicted = stats.buckets_evicted,
            series_evicted = stats.series_evicted,
            remaining_series = self.series.len(),
            "Store eviction pass complete"
        );
        stats
    }

    /// Number of live series
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total buckets across all series
    pub fn bucket_count(&self) -> usize {
        self.series
            .iter()
            .map(|entry| entry.value().bucket_count())
            .sum()
    }
}

/// One series as seen by a scan
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    series: Arc<Series>,
    buckets: Arc<Vec<Bucket>>,
    range: std::ops::Range<usize>,
}

impl SeriesSnapshot {
    pub fn key(&self) -> &FlowKey {
        self.series.key()
    }

    pub fn id(&self) -> &FlowId {
        self.series.id()
    }

    /// Buckets inside the scanned range, oldest first
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets[self.range.clone()]
    }
}

/// Restartable sequence of series snapshots taken when the scan was created
#[derive(Debug, Clone)]
pub struct Scan {
    entries: Arc<Vec<SeriesSnapshot>>,
    position: usize,
}

impl Scan {
    /// Rewind to the first series
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for Scan {
    type Item = SeriesSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.entries.get(self.position)?.clone();
        self.position += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Scan {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::filter::StringMatch;
    use crate::models::{Action, Reporter};

    fn key(dest_namespace: &str) -> FlowKey {
        FlowKey {
            source_name: "client".to_string(),
            source_namespace: "default".to_string(),
            dest_name: "server".to_string(),
            dest_namespace: dest_namespace.to_string(),
            proto: "tcp".to_string(),
            reporter: Reporter::Dst,
            action: Action::Allow,
            ..Default::default()
        }
    }

    fn packets(n: i64) -> FlowStats {
        FlowStats {
            packets_in: n,
            ..Default::default()
        }
    }

    fn store(now: i64, retention_buckets: usize) -> (FlowStore, ManualClock) {
        let clock = ManualClock::new(now);
        let store = FlowStore::new(
            StoreConfig {
                retention_buckets,
                grace_period_secs: 60,
            },
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn test_merge_rejects_unaligned_start() {
        let (store, _) = store(100, 240);
        let err = store.merge_update(&key("ns1"), 7, &packets(1)).unwrap_err();
        assert!(matches!(err, FlowError::InvalidInterval(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_merge_drops_updates_past_horizon() {
        let (store, _) = store(1000, 4);
        // horizon = 990 - 45
        assert_eq!(store.config().horizon(1000), 945);
        assert_eq!(
            store.merge_update(&key("ns1"), 930, &packets(1)).unwrap(),
            MergeOutcome::DroppedLate
        );
        assert_eq!(
            store.merge_update(&key("ns1"), 945, &packets(1)).unwrap(),
            MergeOutcome::Created
        );
    }

    #[test]
    fn test_scan_filters_and_limits_range() {
        let (store, _) = store(100, 240);
        store.merge_update(&key("ns1"), 0, &packets(1)).unwrap();
        store.merge_update(&key("ns1"), 15, &packets(1)).unwrap();
        store.merge_update(&key("ns2"), 45, &packets(1)).unwrap();

        let all: Vec<_> = store.scan(0, 60, &Filter::default()).collect();
        assert_eq!(all.len(), 2);

        let early: Vec<_> = store.scan(15, 30, &Filter::default()).collect();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].key().dest_namespace, "ns1");
        assert_eq!(early[0].buckets().len(), 1);
        assert_eq!(early[0].buckets()[0].start, 15);

        let filter = Filter {
            dest_namespaces: vec![StringMatch::exact("ns2")],
            ..Default::default()
        };
        let filtered: Vec<_> = store.scan(0, 60, &filter).collect();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id(), &key("ns2").id());
    }

    #[test]
    fn test_scan_is_restartable_and_isolated() {
        let (store, _) = store(100, 240);
        store.merge_update(&key("ns1"), 0, &packets(1)).unwrap();

        let mut scan = store.scan(0, 60, &Filter::default());
        store.merge_update(&key("ns1"), 15, &packets(1)).unwrap();
        store.merge_update(&key("ns2"), 0, &packets(1)).unwrap();

        let first: Vec<_> = scan.by_ref().collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].buckets().len(), 1);

        scan.restart();
        assert_eq!(scan.count(), 1);
    }

    #[test]
    fn test_evict_removes_idle_series_after_grace() {
        let (store, clock) = store(100, 4);
        store.merge_update(&key("ns1"), 90, &packets(1)).unwrap();
        assert_eq!(store.bucket_count(), 1);

        // Bucket falls out of the ring but the series is still within grace
        clock.set(150);
        let stats = store.evict(clock.now());
        assert_eq!(stats.buckets_evicted, 1);
        assert_eq!(stats.series_evicted, 0);
        assert_eq!(store.len(), 1);

        clock.set(100 + 60);
        let stats = store.evict(clock.now());
        assert_eq!(stats.series_evicted, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_merge_after_retirement_recreates_series() {
        let (store, clock) = store(100, 4);
        store.merge_update(&key("ns1"), 90, &packets(1)).unwrap();
        clock.set(400);
        store.evict(clock.now());
        assert!(store.is_empty());

        assert_eq!(
            store.merge_update(&key("ns1"), 390, &packets(2)).unwrap(),
            MergeOutcome::Created
        );
        let scanned: Vec<_> = store.scan(0, 500, &Filter::default()).collect();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].buckets()[0].stats.packets_in, 2);
    }

    #[test]
    fn test_scans_run_alongside_merges_and_eviction() {
        let (store, clock) = store(10_000, 8);
        let filter = Filter {
            dest_namespaces: vec![StringMatch::fuzzy("ns")],
            ..Default::default()
        };

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..200 {
                        let ns = format!("ns{}", (writer * 200 + i) % 16);
                        store.merge_update(&key(&ns), 9_990, &packets(1)).unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    store.evict(clock.now());
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    for snapshot in store.scan(0, 20_000, &filter) {
                        assert!(!snapshot.buckets().is_empty());
                    }
                }
            });
        });

        let total: i64 = store
            .scan(0, 20_000, &filter)
            .flat_map(|s| s.buckets().to_vec())
            .map(|b| b.stats.packets_in)
            .sum();
        assert_eq!(total, 800);
        assert_eq!(store.len(), 16);
    }
}
