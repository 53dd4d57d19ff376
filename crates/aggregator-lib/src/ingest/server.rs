//! gRPC ingestion server
//!
//! Each node keeps one `Ingest` stream open. Every update is answered with a
//! receipt, whether it was applied, recognised as a duplicate or rejected.

use super::convert::flow_from_update;
use super::ingestor::Ingestor;
use crate::error::FlowError;
use crate::observability::{AggregatorMetrics, StructuredLogger};
use crate::proto::{FlowCollector, FlowCollectorServer, FlowReceipt, FlowUpdate};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::{Server, ServerTlsConfig};
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

/// Request metadata carrying the reporting node's name
pub const NODE_NAME_METADATA: &str = "x-node-name";

/// Receipts buffered per connection before the reader waits for the node
const RECEIPT_BUFFER: usize = 256;

/// Name of the node behind a request: metadata first, then the peer IP.
///
/// The peer port is left out since it changes on every reconnect, and the
/// name feeds the dedup fingerprint of each update.
pub fn node_name<T>(request: &Request<T>) -> String {
    request
        .metadata()
        .get(NODE_NAME_METADATA)
        .and_then(|value| value.to_str().ok())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| request.remote_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// `flows.v1.FlowCollector` implementation
#[derive(Debug, Clone)]
pub struct FlowCollectorService {
    ingestor: Arc<Ingestor>,
    metrics: AggregatorMetrics,
    logger: StructuredLogger,
    shutdown: broadcast::Sender<()>,
}

impl FlowCollectorService {
    pub fn new(
        ingestor: Arc<Ingestor>,
        metrics: AggregatorMetrics,
        logger: StructuredLogger,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            ingestor,
            metrics,
            logger,
            shutdown,
        }
    }

    /// Read updates from one node until it disconnects or the server stops
    async fn pump(
        self,
        node: String,
        mut updates: Streaming<FlowUpdate>,
        receipts: mpsc::Sender<Result<FlowReceipt, Status>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut received = 0u64;
        let mut failure: Option<String> = None;

        loop {
            tokio::select! {
                message = updates.message() => match message {
                    Ok(Some(update)) => {
                        received += 1;
                        match flow_from_update(update) {
                            Ok(flow) => self.ingestor.apply(&node, &flow),
                            Err(err) => self.ingestor.reject(&node, err),
                        };
                        if receipts.send(Ok(FlowReceipt {})).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        failure = Some(status.to_string());
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    let _ = receipts.try_send(Err(FlowError::Shutdown.into()));
                    break;
                }
            }
        }

        self.metrics.node_disconnected();
        self.logger
            .log_node_disconnected(&node, received, failure.as_deref());
    }
}

#[tonic::async_trait]
impl FlowCollector for FlowCollectorService {
    type IngestStream = ReceiverStream<Result<FlowReceipt, Status>>;

    async fn ingest(
        &self,
        request: Request<Streaming<FlowUpdate>>,
    ) -> Result<Response<Self::IngestStream>, Status> {
        let node = node_name(&request);
        let updates = request.into_inner();
        let (tx, rx) = mpsc::channel(RECEIPT_BUFFER);
        let shutdown = self.shutdown.subscribe();

        self.metrics.node_connected();
        self.logger.log_node_connected(&node);
        tokio::spawn(self.clone().pump(node, updates, tx, shutdown));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Build the server TLS config from PEM files; the client CA enables mTLS
pub fn load_tls_config(
    cert_path: &str,
    key_path: &str,
    client_ca_path: Option<&str>,
) -> Result<ServerTlsConfig> {
    let cert = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read TLS certificate {}", cert_path))?;
    let key =
        std::fs::read(key_path).with_context(|| format!("Failed to read TLS key {}", key_path))?;

    let mut tls = ServerTlsConfig::new().identity(tonic::transport::Identity::from_pem(cert, key));
    if let Some(ca_path) = client_ca_path {
        let ca = std::fs::read(ca_path)
            .with_context(|| format!("Failed to read client CA {}", ca_path))?;
        tls = tls.client_ca_root(tonic::transport::Certificate::from_pem(ca));
    }
    Ok(tls)
}

/// Serve the ingestion service on `listener` until `shutdown` fires.
///
/// The receiver is subscribed by the caller, so a shutdown sent before this
/// future is first polled still stops the server.
pub async fn serve_with_listener(
    listener: TcpListener,
    service: FlowCollectorService,
    tls: Option<ServerTlsConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = listener.local_addr().ok();
    info!(addr = ?addr, tls = tls.is_some(), "Starting ingestion server");

    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder
            .tls_config(tls)
            .context("Invalid ingestion TLS configuration")?;
    }

    builder
        .add_service(FlowCollectorServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("Ingestion server failed")?;

    info!("Ingestion server stopped");
    Ok(())
}

/// Bind `addr` and serve the ingestion service
pub async fn serve(
    addr: SocketAddr,
    service: FlowCollectorService,
    tls: Option<ServerTlsConfig>,
    shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind ingestion server on {}", addr))?;
    serve_with_listener(listener, service, tls, shutdown).await
}
