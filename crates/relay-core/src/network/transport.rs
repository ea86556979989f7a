//! Byte-level transport.
//!
//! `NetworkTransport` is the only place the core touches the wire. The
//! executor hands it a fully resolved `TransportRequest` and enforces the
//! deadline itself; implementations may also honour `timeout` natively.

use crate::config::ClientDefaults;
use crate::error::{RelayError, Result};
use crate::request::{Headers, HttpMethod};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// A request ready to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub timeout: Duration,
}

/// Raw response as received from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("")
                .to_string(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// A JSON response with the given status.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response.headers.insert("Content-Type", "application/json");
        response
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the actual network call.
///
/// Transport-level failures (DNS, refused connections, resets, timeouts) are
/// returned as `Err`; any HTTP response, whatever its status, is `Ok`.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;
}

/// `NetworkTransport` backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the default user agent.
    pub fn new() -> Result<Self> {
        Self::with_user_agent(ClientDefaults::USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| RelayError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: Some(e.to_string()),
            })?;
        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl NetworkTransport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::Timeout(request.timeout)
            } else {
                RelayError::from(e)
            }
        })?;

        let status = response.status();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                RelayError::Timeout(request.timeout)
            } else {
                RelayError::Network {
                    message: format!("{} {} body read failed: {}", request.method, request.url, e),
                    cause: Some(e.to_string()),
                }
            }
        })?;

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            body.len()
        );

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_helpers() {
        let response = TransportResponse::new(404, "missing");
        assert_eq!(response.status_text, "Not Found");
        assert!(!response.is_success());

        let response = TransportResponse::json(201, &serde_json::json!({"id": 1}));
        assert!(response.is_success());
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(HttpMethod::Patch), reqwest::Method::PATCH);
        assert_eq!(to_reqwest_method(HttpMethod::Head), reqwest::Method::HEAD);
    }

    #[tokio::test]
    async fn test_client_creation() {
        assert!(ReqwestTransport::new().is_ok());
        assert!(ReqwestTransport::with_user_agent("relay-test/1.0").is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let transport = ReqwestTransport::new().unwrap();
        // Port 9 (discard) on loopback is not expected to accept connections.
        let request = TransportRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/".to_string(),
            headers: Headers::new(),
            body: None,
            timeout: Duration::from_secs(2),
        };
        let err = transport.send(&request).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {}", err);
    }
}
