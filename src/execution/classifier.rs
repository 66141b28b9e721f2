//! Error Classifier
//!
//! Sorts remote failures into transient, permission and semantic classes.
//! Only transient failures are retried by the gateway.

use crate::execution::engine::RemoteError;

/// Service error codes that indicate a retryable condition.
const TRANSIENT_CODES: &[&str] = &[
    "TEMPORARILY_UNAVAILABLE",
    "DEADLINE_EXCEEDED",
    "REQUEST_LIMIT_EXCEEDED",
    "INTERNAL_ERROR",
    "ABORTED",
];

/// Quota and resource exhaustion are not cleared by retrying.
const QUOTA_CODES: &[&str] = &["RESOURCE_EXHAUSTED", "QUOTA_EXCEEDED"];

const QUOTA_PATTERNS: &[&str] = &["quota exceeded", "quota_exceeded", "resource_exhausted", "resource exhausted"];

const PERMISSION_CODES: &[&str] = &["PERMISSION_DENIED", "INSUFFICIENT_PERMISSIONS"];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
    "warehouse is starting",
    "warehouse is not running",
    "service unavailable",
    "too many requests",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "insufficient_permissions",
    "permission denied",
    "user does not have",
    "not authorized",
    "access denied",
];

/// Messages that point at a statement the compiler should never produce.
const MALFORMED_PATTERNS: &[&str] = &[
    "parse_syntax_error",
    "syntax error",
    "unbound_sql_parameter",
    "invalid_parameter_marker",
];

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a non-success HTTP response from the remote API.
    pub fn classify_status(status: u16, error_code: Option<&str>, message: &str) -> RemoteError {
        match status {
            401 => RemoteError::Unauthenticated(message.to_string()),
            403 => RemoteError::PermissionDenied(message.to_string()),
            408 | 429 | 500..=599 => RemoteError::Transient(format!("HTTP {}: {}", status, message)),
            _ => Self::classify_failure(error_code, message),
        }
    }

    /// Classify a statement that reached a FAILED state.
    pub fn classify_failure(error_code: Option<&str>, message: &str) -> RemoteError {
        let code = error_code.unwrap_or("").to_ascii_uppercase();
        let lowered = message.to_lowercase();

        if code == "UNAUTHENTICATED" {
            return RemoteError::Unauthenticated(message.to_string());
        }
        if PERMISSION_CODES.contains(&code.as_str()) || PERMISSION_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return RemoteError::PermissionDenied(message.to_string());
        }
        if QUOTA_CODES.contains(&code.as_str()) || QUOTA_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return RemoteError::Semantic(message.to_string());
        }
        if TRANSIENT_CODES.contains(&code.as_str()) || TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return RemoteError::Transient(message.to_string());
        }
        RemoteError::Semantic(message.to_string())
    }

    /// Classify a transport failure from the HTTP client.
    pub fn classify_transport(err: &reqwest::Error) -> RemoteError {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return RemoteError::Transient(format!("network error: {}", err));
        }
        if err.is_decode() || err.is_body() {
            return RemoteError::Transient(format!("malformed response: {}", err));
        }
        RemoteError::Transient(err.to_string())
    }

    /// True when a semantic error means the compiler produced bad SQL.
    pub fn is_malformed_statement(err: &RemoteError) -> bool {
        match err {
            RemoteError::Semantic(msg) => {
                let lowered = msg.to_lowercase();
                MALFORMED_PATTERNS.iter().any(|p| lowered.contains(p))
            }
            _ => false,
        }
    }
}
