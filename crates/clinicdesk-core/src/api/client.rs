//! HTTP backend for the clinic REST API.
//!
//! This module provides the `HttpBackend` struct, which talks to the
//! `/api/*` endpoints of a live server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::{Backend, ConnectionTest, ConnectionTestRequest, HealthStatus, Resource};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 500;

/// Live backend over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::ACCEPT, "application/json")
                .timeout(self.timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    debug!(method = %method, url = %url, "Request succeeded");
                    let text = response.text().await?;
                    if text.trim().is_empty() {
                        return serde_json::from_value(Value::Null)
                            .map_err(|e| ApiError::InvalidResponse(e.to_string()));
                    }
                    return serde_json::from_str(&text)
                        .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, Value>(Method::GET, path, None).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get("health").await
    }

    async fn list(&self, resource: Resource) -> Result<Vec<Value>, ApiError> {
        self.get(resource.path()).await
    }

    async fn create(&self, resource: Resource, body: Value) -> Result<Value, ApiError> {
        self.send(Method::POST, resource.path(), Some(&body)).await
    }

    async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ApiError> {
        let path = format!("{}/{}", resource.path(), id);
        self.send(Method::PUT, &path, Some(&body)).await
    }

    async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        let path = format!("{}/{}", resource.path(), id);
        self.send::<Value, Value>(Method::DELETE, &path, None).await
    }

    async fn test_connection(&self, kind: &str) -> Result<ConnectionTest, ApiError> {
        self.send(Method::POST, "test-connection", Some(&ConnectionTestRequest { kind }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = HttpBackend::new("http://localhost:3001/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.url("health"), "http://localhost:3001/api/health");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Port 9 (discard) is not expected to run an HTTP server
        let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = backend.health().await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkError(_)));
    }
}
