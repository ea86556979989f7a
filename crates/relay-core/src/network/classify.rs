//! Failure classification.
//!
//! Every failed attempt is mapped to one of six categories. HTTP status wins
//! when present; otherwise the failure message is matched against known
//! network error patterns. Each category carries a fixed policy that drives
//! the recovery strategy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Validation,
    Server,
    Client,
    Unknown,
}

/// How a category is recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// Wait with exponential backoff, then retry.
    Backoff,
    /// Refresh credentials, then retry once.
    RefreshCredentials,
    /// Retry once without waiting.
    ImmediateRetry,
    /// Surface the failure.
    None,
}

/// Static policy attached to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPolicy {
    pub recoverable: bool,
    pub recovery: RecoveryKind,
    pub retryable: bool,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        ErrorCategory::Network,
        ErrorCategory::Authentication,
        ErrorCategory::Validation,
        ErrorCategory::Server,
        ErrorCategory::Client,
        ErrorCategory::Unknown,
    ];

    pub fn policy(&self) -> CategoryPolicy {
        let (recoverable, recovery, retryable) = match self {
            ErrorCategory::Network => (true, RecoveryKind::Backoff, true),
            ErrorCategory::Authentication => (true, RecoveryKind::RefreshCredentials, true),
            ErrorCategory::Validation => (false, RecoveryKind::None, false),
            ErrorCategory::Server => (true, RecoveryKind::Backoff, true),
            ErrorCategory::Client => (false, RecoveryKind::None, false),
            ErrorCategory::Unknown => (true, RecoveryKind::ImmediateRetry, true),
        };
        CategoryPolicy {
            recoverable,
            recovery,
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.policy().retryable
    }

    /// Message for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::Network => {
                "Unable to reach the server. Check your connection and try again."
            }
            ErrorCategory::Authentication => "Your session has expired. Please sign in again.",
            ErrorCategory::Validation => "The request was rejected as invalid.",
            ErrorCategory::Server => "The server encountered an error. Please try again later.",
            ErrorCategory::Client => "The request could not be completed.",
            ErrorCategory::Unknown => "An unexpected error occurred.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Authentication => "AUTHENTICATION",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Client => "CLIENT",
            ErrorCategory::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Raw failure of a single attempt, before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The server answered with a non-2xx status.
    Status {
        status: u16,
        status_text: String,
        message: String,
    },
    /// The transport failed before a response arrived.
    Transport { message: String },
    /// The transport refused to build the request (bad URL, bad header).
    Rejected { message: String },
    /// The attempt exceeded its deadline.
    Timeout { after_ms: u64 },
    /// A collaborator panicked.
    Panic { message: String },
}

impl Failure {
    pub fn status(&self) -> Option<u16> {
        match self {
            Failure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Failure::Status {
                status,
                status_text,
                message,
            } => {
                if message.is_empty() {
                    format!("HTTP {} {}", status, status_text).trim_end().to_string()
                } else {
                    format!("HTTP {} {}: {}", status, status_text, message)
                }
            }
            Failure::Transport { message } | Failure::Rejected { message } => message.clone(),
            Failure::Timeout { after_ms } => format!("request timeout after {}ms", after_ms),
            Failure::Panic { message } => format!("internal fault: {}", message),
        }
    }
}

/// Classified failure, produced per failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub recoverable: bool,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl ErrorRecord {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            recoverable: category.policy().recoverable,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "dns",
    "failed to fetch",
];

/// Map a status code to a category, if the code decides it.
pub fn category_for_status(status: u16) -> Option<ErrorCategory> {
    match status {
        401 | 403 => Some(ErrorCategory::Authentication),
        400 | 422 => Some(ErrorCategory::Validation),
        500..=599 => Some(ErrorCategory::Server),
        402..=499 => Some(ErrorCategory::Client),
        _ => None,
    }
}

/// Classify a failed attempt.
pub fn classify(failure: &Failure) -> ErrorRecord {
    let message = failure.message();

    let category = match failure {
        // Timeouts are network failures regardless of wording.
        Failure::Timeout { .. } => ErrorCategory::Network,
        Failure::Panic { .. } => ErrorCategory::Unknown,
        Failure::Rejected { .. } => ErrorCategory::Validation,
        _ => failure
            .status()
            .and_then(category_for_status)
            .unwrap_or_else(|| classify_message(&message)),
    };

    let mut record = ErrorRecord::new(category, message);
    if let Some(status) = failure.status() {
        record = record.with_context("status", status);
    }
    record
}

fn classify_message(message: &str) -> ErrorCategory {
    let lowered = message.to_ascii_lowercase();
    if NETWORK_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ErrorCategory::Network
    } else {
        ErrorCategory::Unknown
    }
}
