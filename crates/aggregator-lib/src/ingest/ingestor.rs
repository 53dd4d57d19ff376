//! Applies ingested flows to the store

use crate::aggregator::{payload_hash, DedupCache, FlowStore, MergeOutcome};
use crate::error::FlowError;
use crate::models::{is_aligned, Flow, BUCKET_WIDTH_SECS};
use crate::observability::AggregatorMetrics;
use std::sync::Arc;
use tracing::debug;

/// What happened to one ingested update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied(MergeOutcome),
    /// Already applied earlier, typically a resend after reconnect
    Duplicate,
    /// Bucket is past the retention horizon
    DroppedLate,
    Rejected(FlowError),
}

impl IngestOutcome {
    /// Label used for the updates counter
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Applied(_) => "applied",
            IngestOutcome::Duplicate => "duplicate",
            IngestOutcome::DroppedLate => "dropped_late",
            IngestOutcome::Rejected(FlowError::MalformedFlowKey(_)) => "malformed",
            IngestOutcome::Rejected(_) => "invalid",
        }
    }
}

/// Deduplicates and merges flows reported by nodes
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: Arc<FlowStore>,
    dedup: Arc<DedupCache>,
    metrics: AggregatorMetrics,
}

impl Ingestor {
    pub fn new(store: Arc<FlowStore>, dedup: Arc<DedupCache>, metrics: AggregatorMetrics) -> Self {
        Self {
            store,
            dedup,
            metrics,
        }
    }

    /// Apply one flow reported by `node`
    pub fn apply(&self, node: &str, flow: &Flow) -> IngestOutcome {
        let outcome = self.apply_inner(node, flow);
        self.record(node, &outcome);
        outcome
    }

    /// Record a wire message that could not be converted into a flow
    pub fn reject(&self, node: &str, err: FlowError) -> IngestOutcome {
        let outcome = IngestOutcome::Rejected(err);
        self.record(node, &outcome);
        outcome
    }

    fn record(&self, node: &str, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Rejected(FlowError::MalformedFlowKey(field)) => {
                debug!(node = %node, field = %field, "Dropping malformed flow update");
                self.metrics.inc_malformed();
            }
            IngestOutcome::Rejected(err) => {
                debug!(node = %node, error = %err, "Rejecting flow update");
                self.metrics.inc_update(outcome.label());
            }
            _ => self.metrics.inc_update(outcome.label()),
        }
    }

    fn apply_inner(&self, node: &str, flow: &Flow) -> IngestOutcome {
        if let Err(err) = flow.key.validate() {
            return IngestOutcome::Rejected(err);
        }
        if !is_aligned(flow.start_time) {
            return IngestOutcome::Rejected(FlowError::InvalidInterval(format!(
                "flow start {} is not on the {}s grid",
                flow.start_time, BUCKET_WIDTH_SECS
            )));
        }

        let payload = payload_hash(node, &flow.stats);
        if !self.dedup.admit(&flow.key, flow.start_time, &payload) {
            return IngestOutcome::Duplicate;
        }

        match self
            .store
            .merge_update(&flow.key, flow.start_time, &flow.stats)
        {
            Ok(MergeOutcome::DroppedLate) => IngestOutcome::DroppedLate,
            Ok(outcome) => IngestOutcome::Applied(outcome),
            Err(err) => IngestOutcome::Rejected(err),
        }
    }
}
