//! Aggregator configuration

use aggregator_lib::aggregator::{DedupConfig, EvictionConfig, StoreConfig, StreamConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Aggregator configuration, read from `AGGREGATOR_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Name reported in lifecycle logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// HTTP port for queries, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// gRPC port node agents stream flow updates to
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// 15 second buckets kept per flow key
    #[serde(default = "default_retention_buckets")]
    pub retention_buckets: usize,

    /// Seconds an empty series survives without updates
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: i64,

    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,

    /// How often stream subscriptions check for completed windows
    #[serde(default = "default_stream_tick")]
    pub stream_tick_secs: u64,

    /// Server certificate for the ingestion port; TLS is off without it
    #[serde(default)]
    pub tls_cert_path: Option<String>,

    #[serde(default)]
    pub tls_key_path: Option<String>,

    /// CA for verifying node client certificates (mTLS)
    #[serde(default)]
    pub tls_client_ca_path: Option<String>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "flow-aggregator".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_grpc_port() -> u16 {
    7443
}

fn default_retention_buckets() -> usize {
    240
}

fn default_grace_period() -> i64 {
    60
}

fn default_eviction_interval() -> u64 {
    15
}

fn default_stream_tick() -> u64 {
    15
}

impl AggregatorConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("AGGREGATOR"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read aggregator configuration")?;

        let loaded: AggregatorConfig = config
            .try_deserialize()
            .context("Invalid aggregator configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.retention_buckets == 0 {
            anyhow::bail!("retention_buckets must be at least 1");
        }
        if self.grace_period_secs < 0 {
            anyhow::bail!("grace_period_secs must not be negative");
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            anyhow::bail!("tls_cert_path and tls_key_path must be set together");
        }
        if self.tls_client_ca_path.is_some() && self.tls_cert_path.is_none() {
            anyhow::bail!("tls_client_ca_path requires tls_cert_path and tls_key_path");
        }
        Ok(())
    }

    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            retention_buckets: self.retention_buckets,
            grace_period_secs: self.grace_period_secs,
        }
    }

    pub fn dedup(&self) -> DedupConfig {
        DedupConfig::for_retention(self.retention_buckets, self.grace_period_secs)
    }

    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            tick: Duration::from_secs(self.stream_tick_secs.max(1)),
            ..Default::default()
        }
    }

    pub fn eviction(&self) -> EvictionConfig {
        EvictionConfig {
            interval: Duration::from_secs(self.eviction_interval_secs.max(1)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(vars: &[(&str, &str)]) -> config::Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (format!("AGGREGATOR_{}", k), v.to_string()))
            .collect();
        config::Environment::with_prefix("AGGREGATOR")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AggregatorConfig::from_source(source(&[])).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.grpc_port, 7443);
        assert_eq!(config.retention_buckets, 240);
        assert_eq!(config.grace_period_secs, 60);
        assert_eq!(config.dedup().horizon_secs, 240 * 15 + 60);
        assert!(config.tls_cert_path.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AggregatorConfig::from_source(source(&[
            ("GRPC_PORT", "9443"),
            ("RETENTION_BUCKETS", "8"),
            ("STREAM_TICK_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.grpc_port, 9443);
        assert_eq!(config.store().retention_buckets, 8);
        assert_eq!(config.stream().tick, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(AggregatorConfig::from_source(source(&[("API_PORT", "not-a-port")])).is_err());
        assert!(AggregatorConfig::from_source(source(&[("RETENTION_BUCKETS", "0")])).is_err());
        assert!(
            AggregatorConfig::from_source(source(&[("TLS_CERT_PATH", "/etc/tls/cert.pem")]))
                .is_err()
        );
    }
}
