//! Flow Aggregator - cluster-wide flow telemetry service
//!
//! Node agents stream their flow updates to this process over gRPC. It keeps
//! a rolling hour of 15 second buckets per flow key in memory and answers
//! list, stream and filter-hint queries over HTTP.

use aggregator_lib::{
    aggregator::{Aggregator, DedupCache, EvictionLoop, FlowStore},
    api::{self, AppState},
    clock::SystemClock,
    health::{components, HealthRegistry},
    ingest::{self, FlowCollectorService, Ingestor},
    observability::{AggregatorMetrics, StructuredLogger},
};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGGREGATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting flow-aggregator");

    let config = config::AggregatorConfig::load()?;
    info!(
        node_name = %config.node_name,
        retention_buckets = config.retention_buckets,
        "Aggregator configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AggregatorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // Store and dedup cache are shared by ingestion and queries
    let store = Arc::new(FlowStore::new(config.store(), Arc::new(SystemClock)));
    let dedup = Arc::new(DedupCache::new(config.dedup()));
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        dedup.clone(),
        config.stream(),
        metrics.clone(),
        logger.clone(),
        shutdown_tx.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(store, dedup, metrics.clone()));

    // Ingestion server
    let tls = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert), Some(key)) => Some(ingest::load_tls_config(
            cert,
            key,
            config.tls_client_ca_path.as_deref(),
        )?),
        _ => None,
    };
    let service = FlowCollectorService::new(
        ingestor,
        metrics.clone(),
        logger.clone(),
        shutdown_tx.clone(),
    );
    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.grpc_port));
    let grpc_health = health_registry.clone();
    let grpc_shutdown = shutdown_tx.subscribe();
    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = ingest::serve(grpc_addr, service, tls, grpc_shutdown).await {
            error!(error = %e, "Ingestion server failed");
            grpc_health
                .set_unhealthy(components::INGESTION, e.to_string())
                .await;
        }
    });

    // Eviction loop
    let eviction = EvictionLoop::new(
        aggregator.clone(),
        health_registry.clone(),
        logger.clone(),
        config.eviction(),
    );
    let eviction_handle = tokio::spawn(eviction.run(shutdown_tx.subscribe()));

    // Query, health and metrics server
    let app_state = Arc::new(AppState::new(
        health_registry.clone(),
        metrics.clone(),
        aggregator,
    ));
    let api_health = health_registry.clone();
    let api_shutdown = shutdown_tx.subscribe();
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state, api_shutdown).await {
            error!(error = %e, "API server failed");
            api_health
                .set_unhealthy(components::QUERY, e.to_string())
                .await;
        }
    });

    health_registry.set_ready(true).await;
    logger.log_startup(AGGREGATOR_VERSION, config.grpc_port, config.api_port);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    // Streams and ingestion connections end with a shutdown status
    let _ = shutdown_tx.send(());
    for (name, handle) in [
        ("ingestion", grpc_handle),
        ("eviction", eviction_handle),
        ("api", api_handle),
    ] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
