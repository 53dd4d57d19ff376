//! Flow aggregation library
//!
//! This crate provides the core functionality for:
//! - Ingesting flow updates from node agents over gRPC
//! - Deduplicated aggregation into 15 second buckets per flow key
//! - Rollup list queries, live streams and filter hints
//! - Health checks and observability

pub mod aggregator;
pub mod api;
pub mod clock;
pub mod error;
pub mod filter;
pub mod health;
pub mod ingest;
pub mod models;
pub mod observability;
pub mod policy;
pub mod proto;
pub mod watch;

pub use aggregator::Aggregator;
pub use error::FlowError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AggregatorMetrics, StructuredLogger};
