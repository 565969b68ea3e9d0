//! `HttpClient` backed by a pooled reqwest client.
//!
//! `execute` performs exactly one attempt and hands every status code back to
//! the caller; the media server and metadata clients classify responses and
//! run their own retry loops.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Client whose requests time out after `timeout` unless the request sets its own.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(8)
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Head => Method::HEAD,
        }
    }

    fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }

    /// Map a transport failure; invalid requests are not worth retrying.
    fn classify(error: reqwest::Error) -> BridgeError {
        if error.is_builder() {
            BridgeError::NotAvailable(format!("Invalid request: {error}"))
        } else if error.is_timeout() {
            BridgeError::OperationFailed(format!("Request timed out: {error}"))
        } else if error.is_connect() {
            BridgeError::OperationFailed(format!("Connection failed: {error}"))
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let started = Instant::now();
        let method = request.method;
        let url = request.url;

        let mut builder = self.client.request(Self::method(method), &url);
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(Self::classify)?;
        let status = response.status().as_u16();
        let headers = Self::collect_headers(response.headers());
        let body = response.bytes().await.map_err(Self::classify)?;

        debug!(
            ?method,
            url = %url,
            status,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HTTP request finished"
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(ReqwestHttpClient::new().is_ok());
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(ReqwestHttpClient::method(HttpMethod::Get), Method::GET);
        assert_eq!(ReqwestHttpClient::method(HttpMethod::Delete), Method::DELETE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable() {
        let client = ReqwestHttpClient::with_timeout(Duration::from_secs(2)).unwrap();
        let error = client
            .execute(HttpRequest::new(HttpMethod::Get, "http://127.0.0.1:9/Items"))
            .await
            .unwrap_err();
        assert!(error.is_retryable());
    }
}
