//! Flow ingestion from node agents
//!
//! Nodes push 15 second flow observations over a persistent gRPC stream.
//! Updates are converted, validated, deduplicated and merged into the store.

pub mod convert;
pub mod ingestor;
pub mod server;

#[cfg(test)]
mod tests;

pub use convert::{flow_from_update, update_from_flow};
pub use ingestor::{IngestOutcome, Ingestor};
pub use server::{
    load_tls_config, node_name, serve, serve_with_listener, FlowCollectorService,
    NODE_NAME_METADATA,
};
