//! Per-key bucket series

use crate::models::{FlowId, FlowKey, FlowStats, BUCKET_WIDTH_SECS};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One 15 second accumulation period for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: i64,
    pub end: i64,
    pub stats: FlowStats,
}

impl Bucket {
    pub fn new(start: i64, stats: FlowStats) -> Self {
        Self {
            start,
            end: start + BUCKET_WIDTH_SECS,
            stats,
        }
    }
}

/// Result of merging one update into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new bucket was created for the update
    Created,
    /// The update was added into an existing bucket
    Merged,
    /// The bucket is already past the retention horizon
    DroppedLate,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Created => "created",
            MergeOutcome::Merged => "merged",
            MergeOutcome::DroppedLate => "dropped_late",
        }
    }
}

#[derive(Debug)]
struct SeriesState {
    /// Sorted by start, strictly increasing. Replaced on write, never mutated
    /// while a reader holds a clone.
    buckets: Arc<Vec<Bucket>>,
    last_update: i64,
    retired: bool,
}

/// Bounded ordered buckets for one flow key
#[derive(Debug)]
pub struct Series {
    key: FlowKey,
    id: FlowId,
    state: Mutex<SeriesState>,
}

impl Series {
    pub fn new(key: FlowKey, now: i64) -> Self {
        let id = key.id();
        Self {
            key,
            id,
            state: Mutex::new(SeriesState {
                buckets: Arc::new(Vec::new()),
                last_update: now,
                retired: false,
            }),
        }
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// Merge stats into the bucket starting at `start`.
    ///
    /// Returns `None` when the series was retired by eviction; the caller must
    /// look the key up again.
    pub(crate) fn merge(
        &self,
        start: i64,
        stats: &FlowStats,
        horizon: i64,
        max_buckets: usize,
        now: i64,
    ) -> Option<MergeOutcome> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }
        state.last_update = now;

        if start < horizon {
            return Some(MergeOutcome::DroppedLate);
        }

        let buckets = Arc::make_mut(&mut state.buckets);
        let outcome = match buckets.binary_search_by_key(&start, |b| b.start) {
            Ok(idx) => {
                buckets[idx].stats.merge(stats);
                MergeOutcome::Merged
            }
            Err(idx) => {
                if idx == 0 && buckets.len() >= max_buckets {
                    // Older than everything kept and the ring is full
                    return Some(MergeOutcome::DroppedLate);
                }
                buckets.insert(idx, Bucket::new(start, *stats));
                if buckets.len() > max_buckets {
                    let excess = buckets.len() - max_buckets;
                    buckets.drain(..excess);
                }
                MergeOutcome::Created
            }
        };

        debug_assert!(
            buckets.windows(2).all(|w| w[0].start < w[1].start),
            "bucket starts must be strictly increasing"
        );
        Some(outcome)
    }

    /// Current buckets; later writes do not affect the returned slice
    pub fn snapshot(&self) -> Arc<Vec<Bucket>> {
        self.state.lock().buckets.clone()
    }

    /// Drop buckets starting before `horizon`, returning how many were removed
    pub(crate) fn evict_before(&self, horizon: i64) -> usize {
        let mut state = self.state.lock();
        let keep_from = state.buckets.partition_point(|b| b.start < horizon);
        if keep_from == 0 {
            return 0;
        }
        Arc::make_mut(&mut state.buckets).drain(..keep_from);
        keep_from
    }

    /// Mark the series retired if it is empty and idle for `grace` seconds.
    ///
    /// A retired series rejects further merges so none are lost after the
    /// series leaves the store.
    pub(crate) fn retire_if_idle(&self, now: i64, grace: i64) -> bool {
        let mut state = self.state.lock();
        if state.buckets.is_empty() && now - state.last_update >= grace {
            state.retired = true;
        }
        state.retired
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().buckets.len()
    }
}
