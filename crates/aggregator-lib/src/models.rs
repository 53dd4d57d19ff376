//! Core data models for the flow aggregator

use crate::error::FlowError;
use crate::policy::PolicyTrace;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of one aggregation bucket in seconds
pub const BUCKET_WIDTH_SECS: i64 = 15;

/// Largest timestamp magnitude a resolved query bound may take
pub const MAX_QUERY_TIME: i64 = (i64::MAX / 2) - (i64::MAX / 2) % BUCKET_WIDTH_SECS;

/// Round a timestamp down to the start of its bucket.
///
/// Near `i64::MIN` this rounds up instead of overflowing.
pub fn align_down(ts: i64) -> i64 {
    let rem = ts.rem_euclid(BUCKET_WIDTH_SECS);
    ts.checked_sub(rem)
        .unwrap_or(ts + (BUCKET_WIDTH_SECS - rem))
}

/// Round a timestamp up to the next bucket boundary (identity when aligned).
///
/// Near `i64::MAX` this rounds down instead of overflowing.
pub fn align_up(ts: i64) -> i64 {
    let rem = ts.rem_euclid(BUCKET_WIDTH_SECS);
    if rem == 0 {
        ts
    } else {
        ts.checked_add(BUCKET_WIDTH_SECS - rem).unwrap_or(ts - rem)
    }
}

/// Resolve a possibly relative timestamp against `now` and clamp it into
/// `[-MAX_QUERY_TIME, MAX_QUERY_TIME]`
pub fn resolve_time(ts: i64, now: i64) -> i64 {
    let absolute = if ts < 0 { now.saturating_add(ts) } else { ts };
    absolute.clamp(-MAX_QUERY_TIME, MAX_QUERY_TIME)
}

/// Whether a timestamp sits on the bucket grid
pub fn is_aligned(ts: i64) -> bool {
    ts.rem_euclid(BUCKET_WIDTH_SECS) == 0
}

/// Query time range in unix seconds.
///
/// Negative bounds are offsets from now and an upper bound of zero means now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub low: i64,
    #[serde(default)]
    pub high: i64,
}

impl TimeRange {
    pub fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Resolve relative bounds against `now` and snap them onto the bucket grid
    pub fn resolve(&self, now: i64) -> (i64, i64) {
        let low = resolve_time(self.low, now);
        let high = match self.high {
            0 => resolve_time(now, now),
            h => resolve_time(h, now),
        };
        (align_down(low), align_up(high))
    }
}

/// Kind of endpoint on either side of a flow
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    #[default]
    Unspecified,
    WorkloadEndpoint,
    HostEndpoint,
    NetworkSet,
    Network,
}

/// Which side of the connection produced the observation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    #[default]
    Unspecified,
    Src,
    Dst,
}

/// Verdict applied to a flow (or by a single policy rule)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Unspecified,
    Allow,
    Deny,
    Pass,
}

/// Identity of one aggregation series.
///
/// Two observations with equal keys (including the policy trace) are merged
/// into the same series. The derived ordering is field-wise lexicographic and
/// is used as the final deterministic tie-break when sorting query results.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FlowKey {
    pub source_name: String,
    pub source_namespace: String,
    pub source_type: EndpointType,
    pub dest_name: String,
    pub dest_namespace: String,
    pub dest_type: EndpointType,
    pub dest_port: i64,
    pub dest_service_name: String,
    pub dest_service_namespace: String,
    pub dest_service_port_name: String,
    pub dest_service_port: i64,
    pub proto: String,
    pub reporter: Reporter,
    pub action: Action,
    #[serde(default)]
    pub policies: PolicyTrace,
}

impl FlowKey {
    /// Check that every required identity field is present
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.source_name.is_empty() {
            return Err(FlowError::MalformedFlowKey("source_name"));
        }
        if self.dest_name.is_empty() {
            return Err(FlowError::MalformedFlowKey("dest_name"));
        }
        if self.proto.is_empty() {
            return Err(FlowError::MalformedFlowKey("proto"));
        }
        if self.reporter == Reporter::Unspecified {
            return Err(FlowError::MalformedFlowKey("reporter"));
        }
        if self.action == Action::Unspecified {
            return Err(FlowError::MalformedFlowKey("action"));
        }
        Ok(())
    }

    /// Stable opaque identifier for this key.
    ///
    /// Derived from a SHA-256 digest of the key's canonical encoding, so the
    /// same key yields the same id across queries, streams and platforms.
    pub fn id(&self) -> FlowId {
        let mut digest = CanonicalDigest::default();
        self.encode(&mut digest);
        FlowId(hex::encode(&digest.finish()[..16]))
    }

    /// Feed every identity field, in declaration order, into `digest`
    pub(crate) fn encode(&self, digest: &mut CanonicalDigest) {
        digest
            .str(&self.source_name)
            .str(&self.source_namespace)
            .tag(self.source_type as u8)
            .str(&self.dest_name)
            .str(&self.dest_namespace)
            .tag(self.dest_type as u8)
            .i64(self.dest_port)
            .str(&self.dest_service_name)
            .str(&self.dest_service_namespace)
            .str(&self.dest_service_port_name)
            .i64(self.dest_service_port)
            .str(&self.proto)
            .tag(self.reporter as u8)
            .tag(self.action as u8);
        self.policies.encode(digest);
    }
}

/// SHA-256 over a canonical field encoding.
///
/// Integers are little-endian, strings and byte runs are prefixed with
/// their length as a little-endian `u64`, enums are one tag byte.
#[derive(Default)]
pub(crate) struct CanonicalDigest(Sha256);

impl CanonicalDigest {
    pub(crate) fn i64(&mut self, value: i64) -> &mut Self {
        self.0.update(value.to_le_bytes());
        self
    }

    pub(crate) fn count(&mut self, count: usize) -> &mut Self {
        self.0.update((count as u64).to_le_bytes());
        self
    }

    pub(crate) fn tag(&mut self, tag: u8) -> &mut Self {
        self.0.update([tag]);
        self
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.count(bytes.len());
        self.0.update(bytes);
        self
    }

    pub(crate) fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub(crate) fn finish(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// Opaque flow identifier shared by list and stream results
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters accumulated for one key over one period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub packets_in: i64,
    pub packets_out: i64,
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub num_connections_started: i64,
    pub num_connections_completed: i64,
    pub num_connections_live: i64,
}

impl FlowStats {
    /// Add another observation for the same period.
    ///
    /// Every counter is summed, including live connections, since separate
    /// reports for one bucket come from separate nodes.
    pub fn merge(&mut self, other: &FlowStats) {
        self.packets_in = self.packets_in.saturating_add(other.packets_in);
        self.packets_out = self.packets_out.saturating_add(other.packets_out);
        self.bytes_in = self.bytes_in.saturating_add(other.bytes_in);
        self.bytes_out = self.bytes_out.saturating_add(other.bytes_out);
        self.num_connections_started = self
            .num_connections_started
            .saturating_add(other.num_connections_started);
        self.num_connections_completed = self
            .num_connections_completed
            .saturating_add(other.num_connections_completed);
        self.num_connections_live = self
            .num_connections_live
            .saturating_add(other.num_connections_live);
    }

    /// Fold a later period into a rollup: counters sum, live is replaced
    pub fn roll_forward(&mut self, later: &FlowStats) {
        let live = later.num_connections_live;
        self.merge(later);
        self.num_connections_live = live;
    }
}

/// Aggregated flow over one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub key: FlowKey,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(flatten)]
    pub stats: FlowStats,
}

/// A flow paired with the identifier of its series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowResult {
    pub id: FlowId,
    pub flow: Flow,
}
