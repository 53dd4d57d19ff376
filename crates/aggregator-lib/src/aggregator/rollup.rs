//! Rollup query engine
//!
//! Rolls stored buckets up into windows of the requested width, then sorts
//! and paginates the resulting flows.

use super::series::Bucket;
use super::store::{FlowStore, SeriesSnapshot};
use crate::error::FlowError;
use crate::filter::Filter;
use crate::models::{Flow, FlowResult, FlowStats, TimeRange, BUCKET_WIDTH_SECS};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Field to order list results by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Newest window first
    Time,
    DestName,
    DestNamespace,
    DestType,
    SourceName,
    SourceNamespace,
    SourceType,
}

impl SortBy {
    fn compare(&self, a: &Flow, b: &Flow) -> Ordering {
        match self {
            SortBy::Time => b.start_time.cmp(&a.start_time),
            SortBy::DestName => a.key.dest_name.cmp(&b.key.dest_name),
            SortBy::DestNamespace => a.key.dest_namespace.cmp(&b.key.dest_namespace),
            SortBy::DestType => a.key.dest_type.cmp(&b.key.dest_type),
            SortBy::SourceName => a.key.source_name.cmp(&b.key.source_name),
            SortBy::SourceNamespace => a.key.source_namespace.cmp(&b.key.source_namespace),
            SortBy::SourceType => a.key.source_type.cmp(&b.key.source_type),
        }
    }
}

fn default_interval() -> i64 {
    BUCKET_WIDTH_SECS
}

fn default_page_size() -> i64 {
    100
}

/// Parameters of a list query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub filter: Filter,
    /// Window width in seconds, a positive multiple of 15
    #[serde(default = "default_interval")]
    pub aggregation_interval: i64,
    #[serde(default)]
    pub sort_by: Vec<SortBy>,
    /// 1-indexed; 0 is treated as the first page
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            time_range: TimeRange::default(),
            filter: Filter::default(),
            aggregation_interval: default_interval(),
            sort_by: Vec::new(),
            page: 1,
            page_size: default_page_size(),
        }
    }
}

/// One page of list results.
///
/// The store keeps changing while queries run, so asking for the same page
/// twice can return different flows as data arrives or ages out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub flows: Vec<FlowResult>,
    /// Flows matched across all pages
    pub total: usize,
    pub page: i64,
    pub total_pages: usize,
}

/// Check a list or hint aggregation width
pub fn validate_interval(interval: i64) -> Result<(), FlowError> {
    if interval <= 0 || interval % BUCKET_WIDTH_SECS != 0 {
        return Err(FlowError::InvalidInterval(format!(
            "{}s is not a positive multiple of {}s",
            interval, BUCKET_WIDTH_SECS
        )));
    }
    Ok(())
}

/// Roll buckets up into one flow.
///
/// Counters sum across the buckets and live connections come from the last
/// one. `buckets` must be non-empty and ordered by start.
pub fn roll_up(snapshot: &SeriesSnapshot, start: i64, width: i64, buckets: &[Bucket]) -> Flow {
    let mut stats = FlowStats::default();
    for bucket in buckets {
        stats.roll_forward(&bucket.stats);
    }
    Flow {
        key: snapshot.key().clone(),
        start_time: start,
        end_time: start.saturating_add(width),
        stats,
    }
}

/// Split a series' buckets into windows of `width` aligned to `low`
pub fn windows(snapshot: &SeriesSnapshot, low: i64, width: i64) -> Vec<FlowResult> {
    let mut results = Vec::new();
    let mut current: Option<i64> = None;
    let mut members: Vec<Bucket> = Vec::new();
    let mut last_start = i64::MIN;

    for bucket in snapshot.buckets() {
        let ordered = bucket.start > last_start && bucket.start >= low;
        debug_assert!(ordered, "unordered bucket {} in series", bucket.start);
        if !ordered {
            continue;
        }
        last_start = bucket.start;

        let window = low + (bucket.start - low).div_euclid(width) * width;
        if let Some(w) = current.filter(|w| *w != window) {
            results.push(FlowResult {
                id: snapshot.id().clone(),
                flow: roll_up(snapshot, w, width, &members),
            });
            members.clear();
        }
        current = Some(window);
        members.push(*bucket);
    }

    if let Some(w) = current {
        results.push(FlowResult {
            id: snapshot.id().clone(),
            flow: roll_up(snapshot, w, width, &members),
        });
    }
    results
}

/// Order flows by `sort_by`, then by start time descending, then by key
pub fn sort_flows(flows: &mut [FlowResult], sort_by: &[SortBy]) {
    flows.sort_by(|a, b| {
        sort_by
            .iter()
            .map(|option| option.compare(&a.flow, &b.flow))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.flow.start_time.cmp(&a.flow.start_time))
            .then_with(|| a.flow.key.cmp(&b.flow.key))
    });
}

/// Serves list queries over a flow store
#[derive(Debug, Clone)]
pub struct RollupEngine {
    store: Arc<FlowStore>,
}

impl RollupEngine {
    pub fn new(store: Arc<FlowStore>) -> Self {
        Self { store }
    }

    pub fn list(&self, request: &ListRequest) -> Result<ListResponse, FlowError> {
        validate_interval(request.aggregation_interval)?;
        if request.page_size <= 0 {
            return Err(FlowError::InvalidPageSize(request.page_size));
        }

        let (low, high) = request.time_range.resolve(self.store.clock().now());
        let width = request.aggregation_interval;
        if high.checked_add(width).is_none() {
            return Err(FlowError::InvalidInterval(format!(
                "{}s windows overflow the queried time range",
                width
            )));
        }

        let mut flows: Vec<FlowResult> = self
            .store
            .scan(low, high, &request.filter)
            .flat_map(|snapshot| windows(&snapshot, low, width))
            .collect();
        sort_flows(&mut flows, &request.sort_by);

        let total = flows.len();
        let page_size = request.page_size as usize;
        let page = request.page.max(1);
        let total_pages = total.div_ceil(page_size);

        let skip = usize::try_from(page - 1)
            .ok()
            .and_then(|p| p.checked_mul(page_size))
            .unwrap_or(usize::MAX);
        let flows = flows.into_iter().skip(skip).take(page_size).collect();

        Ok(ListResponse {
            flows,
            total,
            page,
            total_pages,
        })
    }
}
