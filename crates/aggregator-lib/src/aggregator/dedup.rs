//! Deduplication of retransmitted flow updates
//!
//! Node agents resend their whole in-flight buffer after reconnecting. The
//! cache remembers which (key, bucket, payload) triples were already applied
//! so a resend does not double-count.

use crate::models::{CanonicalDigest, FlowKey, FlowStats, BUCKET_WIDTH_SECS};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

type Fingerprint = [u8; 32];

/// Configuration for the deduplication cache
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long past its bucket start an entry is remembered (seconds)
    pub horizon_secs: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            horizon_secs: 240 * BUCKET_WIDTH_SECS + 60,
        }
    }
}

impl DedupConfig {
    /// Horizon covering a store retention window plus its grace period
    pub fn for_retention(retention_buckets: usize, grace_period_secs: i64) -> Self {
        Self {
            horizon_secs: retention_buckets as i64 * BUCKET_WIDTH_SECS + grace_period_secs,
        }
    }
}

/// Digest of one update's payload: the reporting node and its counters
pub fn payload_hash(node: &str, stats: &FlowStats) -> Fingerprint {
    let mut digest = CanonicalDigest::default();
    digest.str(node);
    for counter in [
        stats.packets_in,
        stats.packets_out,
        stats.bytes_in,
        stats.bytes_out,
        stats.num_connections_started,
        stats.num_connections_completed,
        stats.num_connections_live,
    ] {
        digest.i64(counter);
    }
    digest.finish()
}

/// Set of recently admitted updates, sharded for concurrent ingestion
#[derive(Debug)]
pub struct DedupCache {
    config: DedupConfig,
    /// Fingerprint -> bucket start of the admitted update
    entries: DashMap<Fingerprint, i64>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl DedupCache {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Returns true the first time a triple is seen, false for repeats
    pub fn admit(&self, key: &FlowKey, bucket_start: i64, payload: &Fingerprint) -> bool {
        let fingerprint = fingerprint(key, bucket_start, payload);
        match self.entries.entry(fingerprint) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(bucket_start);
                true
            }
        }
    }

    /// Forget entries whose bucket is past the horizon, returning how many were dropped
    pub fn purge(&self, now: i64) -> usize {
        let cutoff = now - self.config.horizon_secs;
        let before = self.entries.len();
        self.entries.retain(|_, bucket_start| *bucket_start >= cutoff);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, remaining = self.entries.len(), "Purged dedup entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn fingerprint(key: &FlowKey, bucket_start: i64, payload: &Fingerprint) -> Fingerprint {
    let mut digest = CanonicalDigest::default();
    key.encode(&mut digest);
    digest.i64(bucket_start).bytes(payload);
    digest.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Reporter};

    fn key(dest: &str) -> FlowKey {
        FlowKey {
            source_name: "client".to_string(),
            dest_name: dest.to_string(),
            proto: "udp".to_string(),
            reporter: Reporter::Src,
            action: Action::Allow,
            ..Default::default()
        }
    }

    fn stats(packets: i64) -> FlowStats {
        FlowStats {
            packets_in: packets,
            ..Default::default()
        }
    }

    #[test]
    fn test_admit_rejects_exact_repeat() {
        let cache = DedupCache::default();
        let payload = payload_hash("node-a", &stats(1));

        assert!(cache.admit(&key("dns"), 30, &payload));
        assert!(!cache.admit(&key("dns"), 30, &payload));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_admit_distinguishes_triple_components() {
        let cache = DedupCache::default();
        let payload = payload_hash("node-a", &stats(1));

        assert!(cache.admit(&key("dns"), 30, &payload));
        assert!(cache.admit(&key("dns"), 45, &payload));
        assert!(cache.admit(&key("api"), 30, &payload));
        assert!(cache.admit(&key("dns"), 30, &payload_hash("node-a", &stats(2))));
    }

    #[test]
    fn test_same_counters_from_different_nodes_are_both_admitted() {
        let cache = DedupCache::default();
        assert!(cache.admit(&key("dns"), 30, &payload_hash("node-a", &stats(1))));
        assert!(cache.admit(&key("dns"), 30, &payload_hash("node-b", &stats(1))));
    }

    #[test]
    fn test_purge_expires_old_entries() {
        let cache = DedupCache::new(DedupConfig { horizon_secs: 60 });
        let payload = payload_hash("node-a", &stats(1));

        cache.admit(&key("dns"), 0, &payload);
        cache.admit(&key("dns"), 90, &payload);

        assert_eq!(cache.purge(100), 1);
        assert_eq!(cache.len(), 1);

        // An expired triple is admitted again
        assert!(cache.admit(&key("dns"), 0, &payload));
    }

    #[test]
    fn test_config_for_retention() {
        let config = DedupConfig::for_retention(4, 10);
        assert_eq!(config.horizon_secs, 70);
    }
}
