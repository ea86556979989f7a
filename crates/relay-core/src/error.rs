//! Error types for the relay client.
//!
//! These errors never reach callers of `ResilientClient::request`: the facade
//! folds every one of them into an `ApiResult`. They are the currency between
//! the core and its collaborators (transports, credential refreshers,
//! configuration loading).

use std::time::Duration;
use thiserror::Error;

/// Main error type for the relay library.
#[derive(Debug, Error)]
pub enum RelayError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // Request errors
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Response decode error: {message}")]
    Decode { message: String },

    // Recovery errors
    #[error("Credential refresh failed: {message}")]
    CredentialRefresh { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Lifecycle errors
    #[error("Request cancelled")]
    Cancelled,

    #[error("Client has been shut down")]
    ClientClosed,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Other(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidRequest {
            message: format!("invalid url: {}", err),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let detail = match std::error::Error::source(&err) {
            Some(source) => format!("{}: {}", err, source),
            None => err.to_string(),
        };
        if err.is_timeout() {
            RelayError::Timeout(Duration::from_secs(0))
        } else if err.is_builder() {
            RelayError::InvalidRequest { message: detail }
        } else if err.is_decode() || err.is_body() {
            RelayError::Decode { message: detail }
        } else if err.is_connect() {
            RelayError::Network {
                message: format!("connection refused: {}", detail),
                cause: Some(err.to_string()),
            }
        } else if err.is_request() {
            RelayError::Network {
                message: detail,
                cause: Some(err.to_string()),
            }
        } else {
            RelayError::Other(detail)
        }
    }
}

impl RelayError {
    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Network { .. } | RelayError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::InvalidRequest {
            message: "empty url".into(),
        };
        assert_eq!(err.to_string(), "Invalid request: empty url");
        assert_eq!(RelayError::Cancelled.to_string(), "Request cancelled");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RelayError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(RelayError::Network {
            message: "reset".into(),
            cause: None
        }
        .is_retryable());
        assert!(!RelayError::Config {
            message: "bad".into()
        }
        .is_retryable());
        assert!(!RelayError::Cancelled.is_retryable());
    }

    #[test]
    fn test_reqwest_builder_error_is_invalid_request() {
        let err = reqwest::Client::new()
            .get("/relative/path")
            .build()
            .unwrap_err();
        let mapped = RelayError::from(err);
        assert!(matches!(mapped, RelayError::InvalidRequest { .. }), "{}", mapped);
        assert!(!mapped.is_retryable());
        assert!(!mapped.to_string().contains("Network"));
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let msg = RelayError::Timeout(Duration::from_millis(250)).to_string();
        assert!(msg.to_lowercase().contains("timeout"));
    }
}
