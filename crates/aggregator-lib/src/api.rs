//! HTTP API for queries, health checks and Prometheus metrics

use crate::aggregator::{
    Aggregator, HintsRequest, HintsResponse, ListRequest, ListResponse, StreamRequest,
};
use crate::error::FlowError;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::AggregatorMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AggregatorMetrics,
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AggregatorMetrics,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            aggregator,
        }
    }
}

/// Query failure rendered as `{"error", "code"}`
#[derive(Debug)]
pub struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            FlowError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state.aggregator.refresh_gauges();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn list_flows(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ListRequest>,
) -> Result<Json<ListResponse>, ApiError> {
    Ok(Json(state.aggregator.list(&request)?))
}

/// Live flows as server-sent events; the stream ends with `event: end`
async fn stream_flows(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let flows = state.aggregator.stream(request)?;

    let events = flows.map(|item| match item {
        Ok(result) => Event::default().event("flow").json_data(&result),
        Err(err) => Ok(Event::default().event("end").data(err.code())),
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn filter_hints(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HintsRequest>,
) -> Result<Json<HintsResponse>, ApiError> {
    Ok(Json(state.aggregator.hints(&request)?))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/flows", post(list_flows))
        .route("/v1/flows/stream", post(stream_flows))
        .route("/v1/filter-hints", post(filter_hints))
        .with_state(state)
}

/// Start the API server; returns once shutdown is signalled and open requests finish
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
