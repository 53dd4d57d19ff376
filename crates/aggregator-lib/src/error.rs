//! Error types surfaced by the aggregation and query engine

use thiserror::Error;

/// Errors returned by ingestion, queries and streams
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Aggregation interval or bucket start not on the 15 second grid
    #[error("invalid aggregation interval: {0}")]
    InvalidInterval(String),

    #[error("invalid page size {0}: must be greater than zero")]
    InvalidPageSize(i64),

    /// A required identity field is missing from an ingested flow
    #[error("malformed flow key: missing {0}")]
    MalformedFlowKey(&'static str),

    #[error("server is shutting down")]
    Shutdown,
}

impl FlowError {
    /// Short machine-readable code used by the HTTP surface
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidInterval(_) => "invalid_interval",
            FlowError::InvalidPageSize(_) => "invalid_page_size",
            FlowError::MalformedFlowKey(_) => "malformed_flow_key",
            FlowError::Shutdown => "shutdown",
        }
    }
}

impl From<FlowError> for tonic::Status {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::Shutdown => tonic::Status::unavailable(err.to_string()),
            _ => tonic::Status::invalid_argument(err.to_string()),
        }
    }
}
