//! Request outcomes.
//!
//! `ApiResult` is what every `request` call resolves to, success or not. It is
//! built once and handed out by value.

use crate::network::ErrorCategory;
use crate::request::Headers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical error strings surfaced in `ApiResult::error`.
pub mod messages {
    pub const INVALID_REQUEST: &str = "invalid request";
    pub const OFFLINE_TIMEOUT: &str = "offline timeout";
    pub const CREDENTIAL_REFRESH_FAILED: &str = "credential refresh failed";
    pub const CANCELLED: &str = "request cancelled";
    pub const DUPLICATE_REQUEST: &str = "duplicate request id";
    pub const CLIENT_CLOSED: &str = "client closed";
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponseData {
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
}

impl ResponseData {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseData::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseData::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    pub success: bool,
    /// HTTP status, or 0 if the network was never reached.
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub data: Option<ResponseData>,
    pub error: Option<String>,
    /// Text suitable for showing to an end user.
    pub user_message: Option<String>,
    /// Category of the final failure.
    pub category: Option<ErrorCategory>,
    /// Body decode failure on an otherwise successful response.
    pub parse_error: Option<String>,
    /// The live failure that was masked by a stale cache entry.
    pub original_error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub from_cache: bool,
    pub from_expired_cache: bool,
    pub retries: u32,
    pub request_id: String,
}

impl ApiResult {
    /// A failure that never reached the network.
    pub fn local_failure(
        request_id: impl Into<String>,
        error: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            status: 0,
            status_text: String::new(),
            headers: Headers::new(),
            data: None,
            error: Some(error.into()),
            user_message: None,
            category: None,
            parse_error: None,
            original_error: None,
            timestamp,
            from_cache: false,
            from_expired_cache: false,
            retries: 0,
            request_id: request_id.into(),
        }
    }

    pub fn invalid_request(request_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let mut result = Self::local_failure(request_id, messages::INVALID_REQUEST, timestamp);
        result.category = Some(ErrorCategory::Validation);
        result.user_message = Some(ErrorCategory::Validation.user_message().to_string());
        result
    }

    pub fn offline_timeout(request_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let mut result = Self::local_failure(request_id, messages::OFFLINE_TIMEOUT, timestamp);
        result.category = Some(ErrorCategory::Network);
        result.user_message = Some(ErrorCategory::Network.user_message().to_string());
        result
    }

    pub fn cancelled(request_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::local_failure(request_id, messages::CANCELLED, timestamp)
    }

    /// Copy of this result as served from a fresh cache entry.
    pub fn as_cache_hit(&self, request_id: &str) -> Self {
        let mut result = self.clone();
        result.from_cache = true;
        result.from_expired_cache = false;
        result.request_id = request_id.to_string();
        result
    }

    /// Copy of this result served after a live failure.
    pub fn as_stale_fallback(&self, request_id: &str, original_error: Option<String>) -> Self {
        let mut result = self.clone();
        result.from_cache = true;
        result.from_expired_cache = true;
        result.original_error = original_error;
        result.request_id = request_id.to_string();
        result
    }
}

/// Decode a body according to its declared content type.
///
/// JSON becomes a structured value, `text/*` a string, anything else raw
/// bytes. An empty body decodes to `None`. Decode failures are returned as
/// the second element rather than raised.
pub fn decode_body(headers: &Headers, body: &[u8]) -> (Option<ResponseData>, Option<String>) {
    if body.is_empty() {
        return (None, None);
    }

    let content_type = headers
        .get("content-type")
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or("").trim();

    if mime == "application/json" || mime.ends_with("+json") {
        match serde_json::from_slice(body) {
            Ok(value) => (Some(ResponseData::Json(value)), None),
            Err(e) => (None, Some(format!("invalid JSON body: {}", e))),
        }
    } else if mime.starts_with("text/") {
        match std::str::from_utf8(body) {
            Ok(text) => (Some(ResponseData::Text(text.to_string())), None),
            Err(e) => (None, Some(format!("invalid UTF-8 text body: {}", e))),
        }
    } else {
        (Some(ResponseData::Binary(body.to_vec())), None)
    }
}
