//! Ingestion tests
//!
//! These tests verify:
//! - Dedup, retention and validation outcomes of the ingestor
//! - A full gRPC round trip against a server on an ephemeral port

use super::*;
use crate::aggregator::{DedupCache, FlowStore, MergeOutcome, StoreConfig};
use crate::clock::ManualClock;
use crate::error::FlowError;
use crate::filter::Filter;
use crate::models::{Action, Flow, FlowKey, FlowStats, Reporter};
use crate::observability::{AggregatorMetrics, StructuredLogger};
use crate::proto::{self, FlowCollectorClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataValue;

fn key(dest: &str) -> FlowKey {
    FlowKey {
        source_name: "frontend-7c9d".to_string(),
        source_namespace: "shop".to_string(),
        dest_name: dest.to_string(),
        dest_namespace: "shop".to_string(),
        dest_port: 8080,
        proto: "tcp".to_string(),
        reporter: Reporter::Src,
        action: Action::Allow,
        ..Default::default()
    }
}

fn flow(dest: &str, start: i64, packets: i64) -> Flow {
    Flow {
        key: key(dest),
        start_time: start,
        end_time: start + 15,
        stats: FlowStats {
            packets_in: packets,
            ..Default::default()
        },
    }
}

fn ingestor(now: i64, retention_buckets: usize) -> (Ingestor, Arc<FlowStore>) {
    let store = Arc::new(FlowStore::new(
        StoreConfig {
            retention_buckets,
            grace_period_secs: 60,
        },
        Arc::new(ManualClock::new(now)),
    ));
    let ingestor = Ingestor::new(
        store.clone(),
        Arc::new(DedupCache::default()),
        AggregatorMetrics::new(),
    );
    (ingestor, store)
}

fn packets_in(store: &FlowStore, dest: &str) -> i64 {
    store
        .scan(0, i64::MAX, &Filter::default())
        .filter(|s| s.key().dest_name == dest)
        .flat_map(|s| s.buckets().to_vec())
        .map(|b| b.stats.packets_in)
        .sum()
}

mod ingestor_tests {
    use super::*;

    #[test]
    fn test_apply_then_resend_is_duplicate() {
        let (ingestor, store) = ingestor(100, 240);

        assert_eq!(
            ingestor.apply("node-a", &flow("cart", 30, 2)),
            IngestOutcome::Applied(MergeOutcome::Created)
        );
        assert_eq!(
            ingestor.apply("node-a", &flow("cart", 30, 2)),
            IngestOutcome::Duplicate
        );
        assert_eq!(packets_in(&store, "cart"), 2);
    }

    #[test]
    fn test_identical_counters_from_two_nodes_are_summed() {
        let (ingestor, store) = ingestor(100, 240);

        ingestor.apply("node-a", &flow("cart", 30, 2));
        assert_eq!(
            ingestor.apply("node-b", &flow("cart", 30, 2)),
            IngestOutcome::Applied(MergeOutcome::Merged)
        );
        assert_eq!(packets_in(&store, "cart"), 4);
    }

    #[test]
    fn test_update_past_retention_is_dropped() {
        let (ingestor, store) = ingestor(1000, 4);
        assert_eq!(
            ingestor.apply("node-a", &flow("cart", 0, 1)),
            IngestOutcome::DroppedLate
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_and_unaligned_updates_are_rejected() {
        let (ingestor, store) = ingestor(100, 240);

        let mut malformed = flow("cart", 30, 1);
        malformed.key.source_name.clear();
        let outcome = ingestor.apply("node-a", &malformed);
        assert_eq!(
            outcome,
            IngestOutcome::Rejected(FlowError::MalformedFlowKey("source_name"))
        );
        assert_eq!(outcome.label(), "malformed");

        let outcome = ingestor.apply("node-a", &flow("cart", 31, 1));
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(FlowError::InvalidInterval(_))
        ));
        assert_eq!(outcome.label(), "invalid");

        // One bad record does not affect other flows
        assert_eq!(
            ingestor.apply("node-a", &flow("cart", 30, 1)),
            IngestOutcome::Applied(MergeOutcome::Created)
        );
        assert_eq!(store.len(), 1);
    }
}

mod grpc_tests {
    use super::*;

    fn service(ingestor: Ingestor, shutdown: &broadcast::Sender<()>) -> FlowCollectorService {
        FlowCollectorService::new(
            Arc::new(ingestor),
            AggregatorMetrics::new(),
            StructuredLogger::new("test-aggregator"),
            shutdown.clone(),
        )
    }

    async fn start_server(
        ingestor: Ingestor,
    ) -> (String, broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown, _) = broadcast::channel(1);
        let service = service(ingestor, &shutdown);
        let server_shutdown = shutdown.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            serve_with_listener(listener, service, None, server_shutdown)
                .await
                .unwrap();
        });

        (format!("http://{}", addr), shutdown, handle)
    }

    async fn connect(endpoint: &str) -> FlowCollectorClient<tonic::transport::Channel> {
        for _ in 0..50 {
            if let Ok(client) = FlowCollectorClient::connect(endpoint.to_string()).await {
                return client;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("ingestion server did not start");
    }

    #[tokio::test]
    async fn test_every_update_gets_a_receipt() {
        let (ingestor, store) = ingestor(100, 240);
        let (endpoint, shutdown, handle) = start_server(ingestor).await;
        let mut client = connect(&endpoint).await;

        let updates = vec![
            update_from_flow(flow("cart", 30, 3)),
            // Resend after a reconnect
            update_from_flow(flow("cart", 30, 3)),
            // Missing key entirely
            proto::FlowUpdate {
                flow: Some(proto::Flow::default()),
            },
            update_from_flow(flow("checkout", 45, 1)),
        ];

        let mut request = tonic::Request::new(tokio_stream::iter(updates));
        request
            .metadata_mut()
            .insert(NODE_NAME_METADATA, MetadataValue::from_static("node-a"));

        let mut receipts = client.ingest(request).await.unwrap().into_inner();
        let mut count = 0;
        while let Some(receipt) = receipts.message().await.unwrap() {
            assert_eq!(receipt, proto::FlowReceipt {});
            count += 1;
        }
        assert_eq!(count, 4);

        assert_eq!(packets_in(&store, "cart"), 3);
        assert_eq!(packets_in(&store, "checkout"), 1);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_ingestion_stream() {
        let (ingestor, _store) = ingestor(100, 240);
        let (endpoint, shutdown, handle) = start_server(ingestor).await;
        let mut client = connect(&endpoint).await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(update_from_flow(flow("cart", 30, 1))).await.unwrap();

        let mut receipts = client
            .ingest(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        assert!(receipts.message().await.unwrap().is_some());

        shutdown.send(()).unwrap();
        let status = receipts.message().await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        drop(tx);
        handle.await.unwrap();
    }

    async fn send_without_node_name(endpoint: &str, update: proto::FlowUpdate) -> usize {
        // A fresh client opens a new connection from a new ephemeral port
        let mut client = connect(endpoint).await;
        let mut receipts = client
            .ingest(tokio_stream::iter(vec![update]))
            .await
            .unwrap()
            .into_inner();
        let mut count = 0;
        while receipts.message().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_resend_on_new_connection_without_node_name_is_deduplicated() {
        let (ingestor, store) = ingestor(100, 240);
        let (endpoint, shutdown, handle) = start_server(ingestor).await;

        let update = update_from_flow(flow("cart", 30, 3));
        assert_eq!(send_without_node_name(&endpoint, update.clone()).await, 1);
        assert_eq!(send_without_node_name(&endpoint, update).await, 1);

        assert_eq!(packets_in(&store, "cart"), 3);

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sent_before_serving_still_stops_server() {
        let (ingestor, _store) = ingestor(100, 240);
        let (shutdown, _) = broadcast::channel(1);
        let service = service(ingestor, &shutdown);
        let server_shutdown = shutdown.subscribe();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        shutdown.send(()).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_with_listener(listener, service, None, server_shutdown),
        )
        .await
        .expect("server ignored a shutdown sent before it started");
        assert!(result.is_ok());
    }
}
