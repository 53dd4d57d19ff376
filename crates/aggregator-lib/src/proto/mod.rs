//! Protobuf definitions for the ingestion service
//!
//! With the `proto-gen` feature the code is generated at build time by
//! tonic-build from `proto/flows/v1/flows.proto`. Without it, the
//! hand-maintained definitions below are used; they mirror the generated
//! output and must be kept in sync with the proto file.

#[cfg(feature = "proto-gen")]
pub mod flows {
    pub mod v1 {
        tonic::include_proto!("flows.v1");
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod flows {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct FlowUpdate {
            #[prost(message, optional, tag = "1")]
            pub flow: Option<Flow>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct FlowReceipt {}

        #[derive(Clone, PartialEq, Message)]
        pub struct Flow {
            #[prost(message, optional, tag = "1")]
            pub key: Option<FlowKey>,
            #[prost(int64, tag = "2")]
            pub start_time: i64,
            #[prost(int64, tag = "3")]
            pub end_time: i64,
            #[prost(int64, tag = "4")]
            pub packets_in: i64,
            #[prost(int64, tag = "5")]
            pub packets_out: i64,
            #[prost(int64, tag = "6")]
            pub bytes_in: i64,
            #[prost(int64, tag = "7")]
            pub bytes_out: i64,
            #[prost(int64, tag = "8")]
            pub num_connections_started: i64,
            #[prost(int64, tag = "9")]
            pub num_connections_completed: i64,
            #[prost(int64, tag = "10")]
            pub num_connections_live: i64,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct FlowKey {
            #[prost(string, tag = "1")]
            pub source_name: String,
            #[prost(string, tag = "2")]
            pub source_namespace: String,
            #[prost(enumeration = "EndpointType", tag = "3")]
            pub source_type: i32,
            #[prost(string, tag = "4")]
            pub dest_name: String,
            #[prost(string, tag = "5")]
            pub dest_namespace: String,
            #[prost(enumeration = "EndpointType", tag = "6")]
            pub dest_type: i32,
            #[prost(int64, tag = "7")]
            pub dest_port: i64,
            #[prost(string, tag = "8")]
            pub dest_service_name: String,
            #[prost(string, tag = "9")]
            pub dest_service_namespace: String,
            #[prost(string, tag = "10")]
            pub dest_service_port_name: String,
            #[prost(int64, tag = "11")]
            pub dest_service_port: i64,
            #[prost(string, tag = "12")]
            pub proto: String,
            #[prost(enumeration = "Reporter", tag = "13")]
            pub reporter: i32,
            #[prost(enumeration = "Action", tag = "14")]
            pub action: i32,
            #[prost(message, optional, tag = "15")]
            pub policies: Option<PolicyTrace>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct PolicyTrace {
            #[prost(message, repeated, tag = "1")]
            pub enforced_policies: Vec<PolicyHit>,
            #[prost(message, repeated, tag = "2")]
            pub pending_policies: Vec<PolicyHit>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct PolicyHit {
            #[prost(enumeration = "PolicyKind", tag = "1")]
            pub kind: i32,
            #[prost(string, tag = "2")]
            pub namespace: String,
            #[prost(string, tag = "3")]
            pub name: String,
            #[prost(string, tag = "4")]
            pub tier: String,
            #[prost(enumeration = "Action", tag = "5")]
            pub action: i32,
            #[prost(int64, tag = "6")]
            pub policy_index: i64,
            #[prost(int64, tag = "7")]
            pub rule_index: i64,
            #[prost(message, optional, boxed, tag = "8")]
            pub trigger: Option<Box<PolicyHit>>,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum EndpointType {
            Unspecified = 0,
            WorkloadEndpoint = 1,
            HostEndpoint = 2,
            NetworkSet = 3,
            Network = 4,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Reporter {
            Unspecified = 0,
            Src = 1,
            Dst = 2,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Action {
            Unspecified = 0,
            Allow = 1,
            Deny = 2,
            Pass = 3,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum PolicyKind {
            Unspecified = 0,
            CalicoNetworkPolicy = 1,
            GlobalNetworkPolicy = 2,
            StagedNetworkPolicy = 3,
            StagedGlobalNetworkPolicy = 4,
            StagedKubernetesNetworkPolicy = 5,
            NetworkPolicy = 6,
            AdminNetworkPolicy = 7,
            BaselineAdminNetworkPolicy = 8,
            Profile = 9,
            EndOfTier = 10,
        }

        pub mod flow_collector_client {
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct FlowCollectorClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl FlowCollectorClient<tonic::transport::Channel> {
                /// Attempt to create a new client by connecting to a given endpoint
                pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
                where
                    D: TryInto<tonic::transport::Endpoint>,
                    D::Error: Into<StdError>,
                {
                    let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
                    Ok(Self::new(conn))
                }
            }

            impl<T> FlowCollectorClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub fn new(inner: T) -> Self {
                    let inner = tonic::client::Grpc::new(inner);
                    Self { inner }
                }

                pub fn with_interceptor<F>(
                    inner: T,
                    interceptor: F,
                ) -> FlowCollectorClient<InterceptedService<T, F>>
                where
                    F: tonic::service::Interceptor,
                    T::ResponseBody: Default,
                    T: tonic::codegen::Service<
                        http::Request<tonic::body::BoxBody>,
                        Response = http::Response<
                            <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                        >,
                    >,
                    <T as tonic::codegen::Service<http::Request<tonic::body::BoxBody>>>::Error:
                        Into<StdError> + Send + Sync,
                {
                    FlowCollectorClient::new(InterceptedService::new(inner, interceptor))
                }

                /// Open the ingestion channel
                pub async fn ingest(
                    &mut self,
                    request: impl tonic::IntoStreamingRequest<Message = super::FlowUpdate>,
                ) -> Result<tonic::Response<tonic::codec::Streaming<super::FlowReceipt>>, tonic::Status>
                {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path =
                        http::uri::PathAndQuery::from_static("/flows.v1.FlowCollector/Ingest");
                    self.inner
                        .streaming(request.into_streaming_request(), path, codec)
                        .await
                }
            }
        }

        pub mod flow_collector_server {
            #![allow(clippy::let_unit_value)]
            use tonic::codegen::*;

            /// Server-side handler for the flow collector service
            #[async_trait]
            pub trait FlowCollector: Send + Sync + 'static {
                /// Receipts sent back over the ingestion channel
                type IngestStream: tokio_stream::Stream<Item = Result<super::FlowReceipt, tonic::Status>>
                    + Send
                    + 'static;

                async fn ingest(
                    &self,
                    request: tonic::Request<tonic::Streaming<super::FlowUpdate>>,
                ) -> Result<tonic::Response<Self::IngestStream>, tonic::Status>;
            }

            #[derive(Debug)]
            pub struct FlowCollectorServer<T: FlowCollector> {
                inner: _Inner<T>,
                accept_compression_encodings: EnabledCompressionEncodings,
                send_compression_encodings: EnabledCompressionEncodings,
                max_decoding_message_size: Option<usize>,
                max_encoding_message_size: Option<usize>,
            }

            struct _Inner<T>(Arc<T>);

            impl<T: FlowCollector> FlowCollectorServer<T> {
                pub fn new(inner: T) -> Self {
                    Self::from_arc(Arc::new(inner))
                }

                pub fn from_arc(inner: Arc<T>) -> Self {
                    Self {
                        inner: _Inner(inner),
                        accept_compression_encodings: Default::default(),
                        send_compression_encodings: Default::default(),
                        max_decoding_message_size: None,
                        max_encoding_message_size: None,
                    }
                }

                pub fn with_interceptor<F>(inner: T, interceptor: F) -> InterceptedService<Self, F>
                where
                    F: tonic::service::Interceptor,
                {
                    InterceptedService::new(Self::new(inner), interceptor)
                }

                /// Limits the maximum size of a decoded message
                #[must_use]
                pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
                    self.max_decoding_message_size = Some(limit);
                    self
                }

                /// Limits the maximum size of an encoded message
                #[must_use]
                pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
                    self.max_encoding_message_size = Some(limit);
                    self
                }
            }

            impl<T, B> tonic::codegen::Service<http::Request<B>> for FlowCollectorServer<T>
            where
                T: FlowCollector,
                B: Body + Send + 'static,
                B::Error: Into<StdError> + Send + 'static,
            {
                type Response = http::Response<tonic::body::BoxBody>;
                type Error = std::convert::Infallible;
                type Future = BoxFuture<Self::Response, Self::Error>;

                fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                    Poll::Ready(Ok(()))
                }

                fn call(&mut self, req: http::Request<B>) -> Self::Future {
                    match req.uri().path() {
                        "/flows.v1.FlowCollector/Ingest" => {
                            struct IngestSvc<T: FlowCollector>(pub Arc<T>);

                            impl<T: FlowCollector> tonic::server::StreamingService<super::FlowUpdate>
                                for IngestSvc<T>
                            {
                                type Response = super::FlowReceipt;
                                type ResponseStream = T::IngestStream;
                                type Future =
                                    BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

                                fn call(
                                    &mut self,
                                    request: tonic::Request<tonic::Streaming<super::FlowUpdate>>,
                                ) -> Self::Future {
                                    let inner = Arc::clone(&self.0);
                                    Box::pin(async move { inner.ingest(request).await })
                                }
                            }

                            let accept_compression_encodings = self.accept_compression_encodings;
                            let send_compression_encodings = self.send_compression_encodings;
                            let max_decoding_message_size = self.max_decoding_message_size;
                            let max_encoding_message_size = self.max_encoding_message_size;
                            let inner = self.inner.clone();
                            Box::pin(async move {
                                let method = IngestSvc(inner.0);
                                let codec = tonic::codec::ProstCodec::default();
                                let mut grpc = tonic::server::Grpc::new(codec)
                                    .apply_compression_config(
                                        accept_compression_encodings,
                                        send_compression_encodings,
                                    )
                                    .apply_max_message_size_config(
                                        max_decoding_message_size,
                                        max_encoding_message_size,
                                    );
                                Ok(grpc.streaming(method, req).await)
                            })
                        }
                        _ => Box::pin(async move {
                            let mut response = http::Response::new(empty_body());
                            let headers = response.headers_mut();
                            headers.insert(
                                "grpc-status",
                                http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                            );
                            headers.insert(
                                http::header::CONTENT_TYPE,
                                http::HeaderValue::from_static("application/grpc"),
                            );
                            Ok(response)
                        }),
                    }
                }
            }

            impl<T: FlowCollector> Clone for FlowCollectorServer<T> {
                fn clone(&self) -> Self {
                    Self {
                        inner: self.inner.clone(),
                        accept_compression_encodings: self.accept_compression_encodings,
                        send_compression_encodings: self.send_compression_encodings,
                        max_decoding_message_size: self.max_decoding_message_size,
                        max_encoding_message_size: self.max_encoding_message_size,
                    }
                }
            }

            impl<T: FlowCollector> Clone for _Inner<T> {
                fn clone(&self) -> Self {
                    Self(Arc::clone(&self.0))
                }
            }

            impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{:?}", self.0)
                }
            }

            impl<T: FlowCollector> tonic::server::NamedService for FlowCollectorServer<T> {
                const NAME: &'static str = "flows.v1.FlowCollector";
            }
        }
    }
}

pub use flows::v1::flow_collector_client::FlowCollectorClient;
pub use flows::v1::flow_collector_server::{FlowCollector, FlowCollectorServer};
pub use flows::v1::*;
