//! Remote engine contract
//!
//! `RemoteEngine` executes compiled statements on behalf of a verified
//! principal. `CatalogSource` lists remote tables for discovery using the
//! service credentials. Both are pluggable; the gateway and discovery only
//! depend on the traits.

use crate::auth::Principal;
use crate::compiler::Statement;
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Per-request execution context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    /// Statements run with the requester's credentials.
    pub principal: Principal,
    /// Bound on a single attempt.
    pub timeout: Duration,
}

impl ExecutionContext {
    pub fn new(principal: Principal, timeout: Duration) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal,
            timeout,
        }
    }
}

/// Result of one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Reported by the engine for mutations, when available.
    pub affected_rows: Option<u64>,
}

impl RemoteRows {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn affected(count: u64) -> Self {
        Self {
            affected_rows: Some(count),
            ..Self::default()
        }
    }

    /// Rows as column-name keyed objects.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned().chain(std::iter::repeat(Value::Null)))
                    .collect()
            })
            .collect()
    }
}

/// Classified remote failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Likely to succeed on retry: connection reset, 5xx/429, warehouse
    /// starting, timeout.
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("remote rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("remote permission denied: {0}")]
    PermissionDenied(String),

    /// Will fail again until the statement changes.
    #[error("remote semantic error: {0}")]
    Semantic(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteError::Transient(msg)
            | RemoteError::Unauthenticated(msg)
            | RemoteError::PermissionDenied(msg)
            | RemoteError::Semantic(msg) => msg,
        }
    }
}

impl From<RemoteError> for GatewayError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transient(msg) => GatewayError::RemoteTransient(msg),
            RemoteError::Unauthenticated(msg) => GatewayError::Unauthenticated(msg),
            RemoteError::PermissionDenied(msg) => GatewayError::PermissionDenied(msg),
            RemoteError::Semantic(msg) => GatewayError::RemoteSemantic(msg),
        }
    }
}

/// One column row from the remote information schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteColumn {
    pub name: String,
    pub ordinal: u32,
    /// Remote type text, e.g. `decimal(10,2)`.
    pub data_type: String,
    /// `YES` / `NO` as reported by the information schema.
    pub is_nullable: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTable {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    /// `MANAGED`, `EXTERNAL`, `VIEW`, ...
    pub table_type: String,
    pub comment: Option<String>,
    pub columns: Vec<RemoteColumn>,
}

impl RemoteTable {
    pub fn is_view(&self) -> bool {
        self.table_type.to_ascii_uppercase().contains("VIEW")
    }
}

#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Engine name for logs (e.g. "databricks").
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        statement: &Statement,
    ) -> std::result::Result<RemoteRows, RemoteError>;
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn list_remote_tables(&self) -> std::result::Result<Vec<RemoteTable>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_pad_short_rows_with_null() {
        let rows = RemoteRows {
            columns: vec!["id".to_string(), "value".to_string()],
            rows: vec![vec![json!("a1"), json!(5)], vec![json!("b2")]],
            affected_rows: None,
        };
        let records = rows.to_records();
        assert_eq!(records[0]["value"], json!(5));
        assert_eq!(records[1]["value"], Value::Null);
    }

    #[test]
    fn test_remote_error_maps_to_gateway_error() {
        let err: GatewayError = RemoteError::Semantic("[DELTA_NOT_NULL_CONSTRAINT_VIOLATED]".to_string()).into();
        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteSemanticError);
        let err: GatewayError = RemoteError::PermissionDenied("no SELECT".to_string()).into();
        assert_eq!(err.kind(), crate::error::ErrorKind::AuthError);
    }

    #[test]
    fn test_views_are_detected() {
        let table = RemoteTable {
            catalog: "c".to_string(),
            schema: "s".to_string(),
            name: "v".to_string(),
            table_type: "MATERIALIZED_VIEW".to_string(),
            comment: None,
            columns: vec![],
        };
        assert!(table.is_view());
    }
}
