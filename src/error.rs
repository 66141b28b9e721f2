use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced table is not in the current catalog snapshot.
    #[error("Validation error: table '{0}' not found in catalog")]
    UnknownTable(String),

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Remote transient error: {0}")]
    RemoteTransient(String),

    #[error("Remote engine unavailable after {attempts} attempts: {message}")]
    RemoteUnavailable { attempts: usize, message: String },

    #[error("Remote engine rejected statement: {0}")]
    RemoteSemantic(String),

    #[error("Discovery cycle failed: {0}")]
    DiscoveryCycle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),
}

/// Error taxonomy exposed to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    AuthError,
    RemoteTransientError,
    RemoteUnavailable,
    RemoteSemanticError,
    DiscoveryCycleFailure,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::AuthError => "AuthError",
            ErrorKind::RemoteTransientError => "RemoteTransientError",
            ErrorKind::RemoteUnavailable => "RemoteUnavailable",
            ErrorKind::RemoteSemanticError => "RemoteSemanticError",
            ErrorKind::DiscoveryCycleFailure => "DiscoveryCycleFailure",
            ErrorKind::ConfigError => "ConfigError",
        };
        write!(f, "{}", name)
    }
}

/// Structured `{kind, message}` error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) | GatewayError::UnknownTable(_) | GatewayError::Json(_) => {
                ErrorKind::ValidationError
            }
            GatewayError::Unauthenticated(_) | GatewayError::PermissionDenied(_) => ErrorKind::AuthError,
            GatewayError::RemoteTransient(_) => ErrorKind::RemoteTransientError,
            GatewayError::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            GatewayError::RemoteSemantic(_) => ErrorKind::RemoteSemanticError,
            GatewayError::DiscoveryCycle(_) => ErrorKind::DiscoveryCycleFailure,
            GatewayError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Message without the variant prefix, as shown to API callers.
    pub fn message(&self) -> String {
        match self {
            GatewayError::Validation(msg)
            | GatewayError::Unauthenticated(msg)
            | GatewayError::PermissionDenied(msg)
            | GatewayError::RemoteTransient(msg)
            | GatewayError::RemoteSemantic(msg)
            | GatewayError::DiscoveryCycle(msg)
            | GatewayError::Config(msg)
            | GatewayError::Json(msg) => msg.clone(),
            GatewayError::UnknownTable(name) => format!("table '{}' not found in catalog", name),
            other => other.to_string(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.message(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
