//! Filter hints: distinct values for a field among observed flows
//!
//! Hints are computed from a store scan with the caller's partial filter,
//! minus any constraint on the field being hinted. They are best-effort and
//! only ever reflect flows that were actually observed.

use super::store::FlowStore;
use crate::error::FlowError;
use crate::filter::Filter;
use crate::models::{FlowKey, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Field a hint request enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintField {
    DestName,
    SourceName,
    DestNamespace,
    SourceNamespace,
    PolicyTier,
}

impl HintField {
    /// Copy of `filter` without the constraint this field would be hinted against
    fn relax(&self, filter: &Filter) -> Filter {
        let mut relaxed = filter.clone();
        match self {
            HintField::DestName => relaxed.dest_names.clear(),
            HintField::SourceName => relaxed.source_names.clear(),
            HintField::DestNamespace => relaxed.dest_namespaces.clear(),
            HintField::SourceNamespace => relaxed.source_namespaces.clear(),
            HintField::PolicyTier => {
                for policy in relaxed.policies.iter_mut() {
                    policy.tier.clear();
                }
            }
        }
        relaxed
    }

    fn project(&self, key: &FlowKey, out: &mut BTreeSet<String>) {
        let value = match self {
            HintField::DestName => &key.dest_name,
            HintField::SourceName => &key.source_name,
            HintField::DestNamespace => &key.dest_namespace,
            HintField::SourceNamespace => &key.source_namespace,
            HintField::PolicyTier => {
                for hit in key.policies.hits() {
                    if !hit.tier.is_empty() && !out.contains(&hit.tier) {
                        out.insert(hit.tier.clone());
                    }
                }
                return;
            }
        };
        if !value.is_empty() && !out.contains(value) {
            out.insert(value.clone());
        }
    }
}

/// Parameters of a hint query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintsRequest {
    pub field: HintField,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub page: i64,
    /// Zero returns every value on one page
    #[serde(default)]
    pub page_size: i64,
}

impl HintsRequest {
    pub fn new(field: HintField) -> Self {
        Self {
            field,
            filter: Filter::default(),
            time_range: TimeRange::default(),
            page: 0,
            page_size: 0,
        }
    }
}

/// Sorted distinct hint values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintsResponse {
    pub hints: Vec<String>,
    pub total: usize,
}

/// Serves hint queries over a flow store
#[derive(Debug, Clone)]
pub struct HintIndex {
    store: Arc<FlowStore>,
}

impl HintIndex {
    pub fn new(store: Arc<FlowStore>) -> Self {
        Self { store }
    }

    pub fn hints(&self, request: &HintsRequest) -> Result<HintsResponse, FlowError> {
        if request.page_size < 0 {
            return Err(FlowError::InvalidPageSize(request.page_size));
        }

        let (low, high) = request.time_range.resolve(self.store.clock().now());
        let filter = request.field.relax(&request.filter);

        let mut values = BTreeSet::new();
        for snapshot in self.store.scan(low, high, &filter) {
            request.field.project(snapshot.key(), &mut values);
        }

        let total = values.len();
        let hints = if request.page_size == 0 {
            values.into_iter().collect()
        } else {
            let size = request.page_size as usize;
            let page = request.page.max(1) as usize;
            values
                .into_iter()
                .skip((page - 1).saturating_mul(size))
                .take(size)
                .collect()
        };

        Ok(HintsResponse { hints, total })
    }
}
