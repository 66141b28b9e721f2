//! Databricks Execution Engine
//!
//! Runs statements through the SQL Statement Execution API:
//! `POST /api/2.0/sql/statements` with named parameters, then polls
//! `GET /api/2.0/sql/statements/{id}` while the statement is PENDING or
//! RUNNING. Results come back inline as JSON arrays of strings and are
//! converted to typed JSON values using the result manifest.

use crate::compiler::{BoundParam, Statement};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::execution::classifier::ErrorClassifier;
use crate::execution::engine::{
    CatalogSource, ExecutionContext, RemoteColumn, RemoteEngine, RemoteError, RemoteRows, RemoteTable,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

type RemoteResult<T> = std::result::Result<T, RemoteError>;

// Databricks caps the synchronous wait at 50s.
const WAIT_TIMEOUT: &str = "10s";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: usize = 10_000;

const CATALOG_QUERY: &str = "SELECT c.table_catalog, c.table_schema, c.table_name, t.table_type, \
     t.comment AS table_comment, c.column_name, c.ordinal_position, c.full_data_type, c.is_nullable, \
     c.comment AS column_comment \
     FROM system.information_schema.columns c \
     JOIN system.information_schema.tables t \
     ON c.table_catalog = t.table_catalog AND c.table_schema = t.table_schema AND c.table_name = t.table_name \
     ORDER BY c.table_catalog, c.table_schema, c.table_name, c.ordinal_position";

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    parameters: Vec<StatementParameter>,
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
}

#[derive(Debug, Serialize)]
struct StatementParameter {
    name: String,
    // Omitted value binds NULL.
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(rename = "type")]
    param_type: String,
}

impl From<&BoundParam> for StatementParameter {
    fn from(param: &BoundParam) -> Self {
        Self {
            name: param.name.clone(),
            value: param.value.to_parameter_text(),
            param_type: param.sql_type.parameter_type(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    manifest: Option<ResultManifest>,
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ServiceError>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    schema: Option<ManifestSchema>,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
struct ManifestColumn {
    name: String,
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    data_array: Option<Vec<Vec<Value>>>,
    next_chunk_internal_link: Option<String>,
}

/// Cancels the remote statement if the caller stops waiting before it
/// reaches a terminal state.
struct CancelGuard {
    client: Client,
    url: String,
    token: String,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let url = std::mem::take(&mut self.url);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                match client.post(&url).bearer_auth(&token).send().await {
                    Ok(_) => debug!("cancel requested: {}", url),
                    Err(e) => warn!("failed to cancel statement {}: {}", url, e),
                }
            });
        }
    }
}

pub struct DatabricksEngine {
    host: String,
    warehouse_id: String,
    service_token: String,
    client: Client,
}

impl DatabricksEngine {
    pub fn new(host: &str, warehouse_id: &str, service_token: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create HTTP client for Databricks: {}", e)))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            warehouse_id: warehouse_id.to_string(),
            service_token: service_token.to_string(),
            client,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        // A single HTTP call never needs longer than the longest caller timeout.
        let request_timeout = config.statement_timeout.max(config.discovery_timeout);
        Self::new(&config.host, &config.warehouse_id, &config.service_token, request_timeout)
    }

    /// Submit, poll until terminal, and collect every result chunk.
    async fn run(&self, sql: &str, params: &[BoundParam], token: &str) -> RemoteResult<RemoteRows> {
        let request = StatementRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            parameters: params.iter().map(StatementParameter::from).collect(),
            wait_timeout: WAIT_TIMEOUT,
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };

        let url = format!("{}/api/2.0/sql/statements", self.host);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e))?;
        let mut current: StatementResponse = parse(response).await?;
        debug!(statement_id = %current.statement_id, state = %current.status.state, "statement submitted");

        let mut guard = CancelGuard {
            client: self.client.clone(),
            url: format!("{}/api/2.0/sql/statements/{}/cancel", self.host, current.statement_id),
            token: token.to_string(),
            armed: true,
        };

        let mut polls = 0;
        while matches!(current.status.state.as_str(), "PENDING" | "RUNNING") {
            polls += 1;
            if polls > MAX_POLLS {
                return Err(RemoteError::Transient(format!(
                    "statement {} still running after {} polls",
                    current.statement_id, MAX_POLLS
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            let url = format!("{}/api/2.0/sql/statements/{}", self.host, current.statement_id);
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ErrorClassifier::classify_transport(&e))?;
            current = parse(response).await?;
        }
        guard.armed = false;

        let state = current.status.state.clone();
        match state.as_str() {
            "SUCCEEDED" => self.collect(current, token).await,
            "FAILED" => {
                let error = current.status.error.unwrap_or_default();
                let message = error.message.unwrap_or_else(|| "statement failed".to_string());
                Err(ErrorClassifier::classify_failure(error.error_code.as_deref(), &message))
            }
            "CANCELED" => Err(RemoteError::Transient(format!(
                "statement {} was canceled",
                current.statement_id
            ))),
            other => Err(RemoteError::Semantic(format!(
                "statement {} ended in state {}",
                current.statement_id, other
            ))),
        }
    }

    async fn collect(&self, response: StatementResponse, token: &str) -> RemoteResult<RemoteRows> {
        let columns: Vec<ManifestColumn> = response
            .manifest
            .and_then(|m| m.schema)
            .map(|s| s.columns)
            .unwrap_or_default();

        let mut raw_rows: Vec<Vec<Value>> = Vec::new();
        let mut next = response.result.and_then(|chunk| {
            raw_rows.extend(chunk.data_array.unwrap_or_default());
            chunk.next_chunk_internal_link
        });
        while let Some(link) = next {
            let url = format!("{}{}", self.host, link);
            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ErrorClassifier::classify_transport(&e))?;
            let chunk: ResultChunk = parse(response).await?;
            raw_rows.extend(chunk.data_array.unwrap_or_default());
            next = chunk.next_chunk_internal_link;
        }

        let rows: Vec<Vec<Value>> = raw_rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .map(|(i, value)| typed_value(value, columns.get(i).and_then(|c| c.type_name.as_deref())))
                    .collect()
            })
            .collect();

        let affected_rows = columns
            .iter()
            .position(|c| c.name == "num_affected_rows")
            .and_then(|i| rows.first().and_then(|row| row.get(i)))
            .and_then(Value::as_u64);

        Ok(RemoteRows {
            columns: columns.into_iter().map(|c| c.name).collect(),
            rows,
            affected_rows,
        })
    }
}

async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> RemoteResult<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let error: ServiceError = serde_json::from_str(&text).unwrap_or_default();
        let message = error.message.unwrap_or(text);
        return Err(ErrorClassifier::classify_status(
            status.as_u16(),
            error.error_code.as_deref(),
            &message,
        ));
    }
    response
        .json()
        .await
        .map_err(|e| RemoteError::Transient(format!("malformed statement response: {}", e)))
}

/// JSON_ARRAY results carry every value as a string; restore numbers and
/// booleans from the manifest type.
fn typed_value(value: Value, type_name: Option<&str>) -> Value {
    let typed = match (&value, type_name.unwrap_or("STRING")) {
        (Value::String(text), "BYTE" | "SHORT" | "INT" | "LONG") => text.parse::<i64>().ok().map(Value::from),
        (Value::String(text), "FLOAT" | "DOUBLE") => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        (Value::String(text), "BOOLEAN") => text.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    typed.unwrap_or(value)
}

fn text_at(row: &[Value], index: usize) -> Option<String> {
    match row.get(index)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Group ordered information-schema rows into tables.
fn group_catalog_rows(rows: &RemoteRows) -> RemoteResult<Vec<RemoteTable>> {
    let mut tables: Vec<RemoteTable> = Vec::new();
    for (index, row) in rows.rows.iter().enumerate() {
        let malformed = |field: &str| RemoteError::Semantic(format!("catalog row {} has no {}", index, field));
        let catalog = text_at(row, 0).ok_or_else(|| malformed("table_catalog"))?;
        let schema = text_at(row, 1).ok_or_else(|| malformed("table_schema"))?;
        let name = text_at(row, 2).ok_or_else(|| malformed("table_name"))?;
        let ordinal = text_at(row, 6)
            .and_then(|o| o.parse::<u32>().ok())
            .ok_or_else(|| malformed("ordinal_position"))?;

        let column = RemoteColumn {
            name: text_at(row, 5).ok_or_else(|| malformed("column_name"))?,
            ordinal,
            data_type: text_at(row, 7).ok_or_else(|| malformed("full_data_type"))?,
            is_nullable: text_at(row, 8).unwrap_or_default(),
            comment: text_at(row, 9),
        };

        match tables.last_mut() {
            Some(last) if last.catalog == catalog && last.schema == schema && last.name == name => {
                last.columns.push(column);
            }
            _ => tables.push(RemoteTable {
                catalog,
                schema,
                name,
                table_type: text_at(row, 3).unwrap_or_default(),
                comment: text_at(row, 4),
                columns: vec![column],
            }),
        }
    }
    Ok(tables)
}

#[async_trait]
impl RemoteEngine for DatabricksEngine {
    fn name(&self) -> &'static str {
        "databricks"
    }

    async fn execute(&self, ctx: &ExecutionContext, statement: &Statement) -> RemoteResult<RemoteRows> {
        debug!(
            request_id = %ctx.request_id,
            user = %ctx.principal.user_name,
            kind = ?statement.kind(),
            params = statement.params().len(),
            "executing on Databricks: {}",
            statement.sql()
        );
        self.run(statement.sql(), statement.params(), ctx.principal.token()).await
    }
}

#[async_trait]
impl CatalogSource for DatabricksEngine {
    async fn list_remote_tables(&self) -> RemoteResult<Vec<RemoteTable>> {
        let rows = self.run(CATALOG_QUERY, &[], &self.service_token).await?;
        let tables = group_catalog_rows(&rows)?;
        info!("information schema returned {} tables ({} columns)", tables.len(), rows.rows.len());
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqlType;
    use crate::compiler::SqlValue;
    use serde_json::json;

    #[test]
    fn test_parameters_serialize_null_without_value() {
        let params = vec![
            BoundParam {
                name: "p0".to_string(),
                value: SqlValue::Text("a1".to_string()),
                sql_type: SqlType::String,
            },
            BoundParam {
                name: "p1".to_string(),
                value: SqlValue::Null,
                sql_type: SqlType::Int,
            },
        ];
        let request = StatementRequest {
            statement: "SELECT 1",
            warehouse_id: "wh",
            parameters: params.iter().map(StatementParameter::from).collect(),
            wait_timeout: WAIT_TIMEOUT,
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["parameters"][0], json!({"name": "p0", "value": "a1", "type": "STRING"}));
        assert_eq!(body["parameters"][1], json!({"name": "p1", "type": "INT"}));
    }

    #[test]
    fn test_typed_values_from_manifest() {
        assert_eq!(typed_value(json!("5"), Some("INT")), json!(5));
        assert_eq!(typed_value(json!("1.5"), Some("DOUBLE")), json!(1.5));
        assert_eq!(typed_value(json!("true"), Some("BOOLEAN")), json!(true));
        assert_eq!(typed_value(json!("12.50"), Some("DECIMAL")), json!("12.50"));
        assert_eq!(typed_value(Value::Null, Some("INT")), Value::Null);
    }

    #[test]
    fn test_catalog_rows_group_by_table() {
        let rows = RemoteRows {
            columns: vec![],
            rows: vec![
                vec![
                    json!("c"), json!("s"), json!("t"), json!("MANAGED"), Value::Null,
                    json!("id"), json!(1), json!("string"), json!("NO"), Value::Null,
                ],
                vec![
                    json!("c"), json!("s"), json!("t"), json!("MANAGED"), Value::Null,
                    json!("value"), json!(2), json!("int"), json!("YES"), json!("amount"),
                ],
                vec![
                    json!("c"), json!("s"), json!("v"), json!("VIEW"), Value::Null,
                    json!("id"), json!(1), json!("string"), json!("YES"), Value::Null,
                ],
            ],
            affected_rows: None,
        };
        let tables = group_catalog_rows(&rows).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(tables[0].columns[1].comment.as_deref(), Some("amount"));
        assert!(tables[1].is_view());
    }

    #[test]
    fn test_malformed_catalog_row_is_rejected() {
        let rows = RemoteRows {
            columns: vec![],
            rows: vec![vec![json!("c"), json!("s"), json!("t")]],
            affected_rows: None,
        };
        assert!(group_catalog_rows(&rows).is_err());
    }
}
