//! Periodic eviction loop

use super::Aggregator;
use crate::health::{components, HealthRegistry};
use crate::observability::StructuredLogger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Configuration for the eviction loop
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Time between passes (default: 15 seconds)
    pub interval: Duration,
    /// A pass slower than this marks the store degraded
    pub slow_pass: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            slow_pass: Duration::from_secs(1),
        }
    }
}

/// Runs [`Aggregator::evict`] on a fixed interval until shutdown
pub struct EvictionLoop {
    aggregator: Arc<Aggregator>,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: EvictionConfig,
}

impl EvictionLoop {
    pub fn new(
        aggregator: Arc<Aggregator>,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: EvictionConfig,
    ) -> Self {
        Self {
            aggregator,
            health,
            logger,
            config,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting eviction loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down eviction loop");
                    break;
                }
            }
        }
    }

    async fn run_once(&self) {
        let started = Instant::now();
        let report = self.aggregator.evict();
        let elapsed = started.elapsed();

        if report.store.buckets_evicted > 0
            || report.store.series_evicted > 0
            || report.dedup_purged > 0
        {
            self.logger.log_eviction(
                report.store.buckets_evicted,
                report.store.series_evicted,
                report.dedup_purged,
            );
        }

        if elapsed > self.config.slow_pass {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                series = self.aggregator.store().len(),
                "Slow eviction pass"
            );
            self.health
                .set_degraded(components::STORE, "Slow eviction pass")
                .await;
        } else {
            self.health.set_healthy(components::STORE).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{DedupCache, FlowStore, StoreConfig, StreamConfig};
    use crate::clock::ManualClock;
    use crate::health::ComponentStatus;
    use crate::models::{Action, FlowKey, FlowStats, Reporter};
    use crate::observability::AggregatorMetrics;

    #[tokio::test]
    async fn test_loop_evicts_until_shutdown() {
        let clock = ManualClock::new(100);
        let store = Arc::new(FlowStore::new(
            StoreConfig {
                retention_buckets: 4,
                grace_period_secs: 0,
            },
            Arc::new(clock.clone()),
        ));
        let key = FlowKey {
            source_name: "web".to_string(),
            dest_name: "db".to_string(),
            proto: "udp".to_string(),
            reporter: Reporter::Src,
            action: Action::Deny,
            ..Default::default()
        };
        store
            .merge_update(&key, 90, &FlowStats::default())
            .unwrap();

        let (shutdown, _) = broadcast::channel(1);
        let logger = StructuredLogger::new("test-aggregator");
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            Arc::new(DedupCache::default()),
            StreamConfig::default(),
            AggregatorMetrics::new(),
            logger.clone(),
            shutdown.clone(),
        ));
        let health = HealthRegistry::new();
        health.register_all().await;
        health
            .set_degraded(components::STORE, "not yet evicted")
            .await;

        clock.set(1000);
        let eviction = EvictionLoop::new(
            aggregator,
            health.clone(),
            logger,
            EvictionConfig {
                interval: Duration::from_millis(10),
                slow_pass: Duration::from_secs(5),
            },
        );
        let handle = tokio::spawn(eviction.run(shutdown.subscribe()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !store.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.send(()).unwrap();
        handle.await.unwrap();

        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Healthy);
    }
}
