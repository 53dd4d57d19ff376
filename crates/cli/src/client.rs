//! API client for the Flow Aggregator HTTP surface

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the Flow Aggregator
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a probe endpoint that answers with JSON on both success and failure
    pub async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send_post(path, body, true).await?;
        response.json().await.context("Failed to parse response")
    }

    /// POST and return the open response for reading a server-sent event stream
    pub async fn post_stream<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        self.send_post(path, body, false).await
    }

    async fn send_post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        with_timeout: bool,
    ) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.post(url).json(body);
        if with_timeout {
            request = request.timeout(std::time::Duration::from_secs(30));
        }
        let response = request.send().await.context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => anyhow::bail!("API error ({}): {} [{}]", status, err.error, err.code),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        Ok(response)
    }
}

// API request types

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StringMatch {
    pub value: String,
    #[serde(rename = "type")]
    pub match_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_names: Vec<StringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_namespaces: Vec<StringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dest_names: Vec<StringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dest_namespaces: Vec<StringMatch>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    pub low: i64,
    pub high: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub time_range: TimeRange,
    pub filter: Filter,
    pub aggregation_interval: i64,
    pub sort_by: Vec<String>,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    pub start_time_gte: i64,
    pub filter: Filter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintsRequest {
    pub field: String,
    pub filter: Filter,
    pub time_range: TimeRange,
    pub page: i64,
    pub page_size: i64,
}

// API response types

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowKey {
    pub source_name: String,
    pub source_namespace: String,
    pub dest_name: String,
    pub dest_namespace: String,
    pub dest_port: i64,
    pub proto: String,
    pub reporter: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub key: FlowKey,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub packets_in: i64,
    #[serde(default)]
    pub packets_out: i64,
    #[serde(default)]
    pub bytes_in: i64,
    #[serde(default)]
    pub bytes_out: i64,
    #[serde(default)]
    pub num_connections_started: i64,
    #[serde(default)]
    pub num_connections_completed: i64,
    #[serde(default)]
    pub num_connections_live: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub id: String,
    pub flow: Flow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub flows: Vec<FlowResult>,
    pub total: usize,
    pub page: i64,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintsResponse {
    pub hints: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_BODY: &str = r#"{
        "flows": [{
            "id": "3f2a",
            "flow": {
                "key": {"source_name": "web", "dest_name": "db", "proto": "tcp",
                        "reporter": "dst", "action": "allow", "policies": {"enforced": [], "pending": []}},
                "start_time": 0, "end_time": 45, "packets_in": 3, "bytes_in": 300
            }
        }],
        "total": 1, "page": 1, "total_pages": 1
    }"#;

    fn list_request() -> ListRequest {
        ListRequest {
            time_range: TimeRange { low: -900, high: 0 },
            filter: Filter::default(),
            aggregation_interval: 45,
            sort_by: vec![],
            page: 1,
            page_size: 100,
        }
    }

    #[tokio::test]
    async fn test_post_parses_list_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/flows")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"aggregation_interval": 45}),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(LIST_BODY)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response: ListResponse = client.post("v1/flows", &list_request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.total, 1);
        assert_eq!(response.flows[0].flow.key.dest_name, "db");
        assert_eq!(response.flows[0].flow.bytes_in, 300);
    }

    #[tokio::test]
    async fn test_api_error_includes_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/flows")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid page size 0: must be greater than zero", "code": "invalid_page_size"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client
            .post::<ListResponse, _>("v1/flows", &list_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid_page_size"));
    }

    #[tokio::test]
    async fn test_probe_returns_body_on_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/readyz")
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ready": false, "reason": "Aggregator not yet initialized"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (status, readiness): (_, ReadinessResponse) = client.probe("readyz").await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!readiness.ready);
    }

    #[test]
    fn test_empty_filter_fields_are_omitted() {
        let body = serde_json::to_value(Filter::default()).unwrap();
        assert_eq!(body, serde_json::json!({}));
    }
}
