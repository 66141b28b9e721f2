//! Route dispatch.
//!
//! ```text
//! GET    /                      service info
//! GET    /health                catalog generation and counters
//! GET    /tables                list tables
//! POST   /tables/create         create table
//! DELETE /tables/drop/{fqn}     drop table
//! GET    /tables/{fqn}          read rows (?limit=&col=value...)
//! POST   /tables/{fqn}          insert rows {"data": [...]}
//! PUT    /tables/{fqn}          update rows {"filter": {}, "updates": {}, "upsert": false}
//! DELETE /tables/{fqn}          delete rows {"filter": {}}
//! ```
//!
//! On reads `limit` is reserved, and each query key may appear once.

use crate::auth::bearer_token;
use crate::compiler::{
    CreateTableRequest, DeleteRequest, DropTableRequest, FilterSpec, InsertRequest, ReadRequest, Row, UpdateRequest,
};
use crate::error::{GatewayError, Result};
use crate::observability::GatewayMetrics;
use crate::server::request::HttpRequest;
use crate::server::response::HttpResponse;
use crate::service::{InsertStatus, TableService};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub service: TableService,
    pub metrics: Arc<GatewayMetrics>,
}

impl AppState {
    pub fn new(service: TableService, metrics: Arc<GatewayMetrics>) -> Self {
        Self { service, metrics }
    }
}

#[derive(Debug, Deserialize)]
struct InsertPayload {
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    filter: FilterSpec,
    updates: Row,
    #[serde(default)]
    upsert: bool,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    filter: FilterSpec,
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    version: &'a str,
    catalog_generation: u64,
    catalog_tables: usize,
    catalog_refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
    metrics: crate::observability::MetricsSnapshot,
}

pub async fn route(state: &AppState, request: &HttpRequest) -> HttpResponse {
    let method = request.method.as_str();
    let path = request.path.as_str();

    let outcome = match (method, path) {
        ("OPTIONS", _) => return HttpResponse::no_content(),
        ("GET", "/") => Ok(info()),
        ("GET", "/health") => Ok(health(state)),
        ("GET", "/tables") => list_tables(state, request).await,
        ("POST", "/tables/create") => create_table(state, request).await,
        ("DELETE", p) if p.starts_with("/tables/drop/") => {
            drop_table(state, request, &p["/tables/drop/".len()..]).await
        }
        (m, p) if p.starts_with("/tables/") => {
            let table = &p["/tables/".len()..];
            match m {
                "GET" => read_rows(state, request, table).await,
                "POST" => insert_rows(state, request, table).await,
                "PUT" => update_rows(state, request, table).await,
                "DELETE" => delete_rows(state, request, table).await,
                _ => Ok(method_not_allowed(m, p)),
            }
        }
        _ => Ok(HttpResponse::json(
            404,
            &json!({"kind": "NotFound", "message": format!("no route for {} {}", method, path)}),
        )),
    };

    outcome.unwrap_or_else(|err| HttpResponse::error(&err))
}

fn token(request: &HttpRequest) -> Result<&str> {
    bearer_token(request.header("authorization"))
}

fn table_name(raw: &str) -> Result<String> {
    if raw.is_empty() || raw.contains('/') {
        return Err(GatewayError::validation("table path must be /tables/catalog.schema.table"));
    }
    Ok(raw.to_string())
}

fn info() -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({
            "name": "Supabricks",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "REST access to lakehouse tables through a SQL warehouse",
            "endpoints": {
                "health": "/health",
                "tables": "/tables",
                "create": "/tables/create",
                "drop": "/tables/drop/{catalog.schema.table}",
            },
        }),
    )
}

fn health(state: &AppState) -> HttpResponse {
    let snapshot = state.service.directory().snapshot();
    HttpResponse::json(
        200,
        &HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            catalog_generation: snapshot.generation(),
            catalog_tables: snapshot.len(),
            catalog_refreshed_at: snapshot.refreshed_at(),
            metrics: state.metrics.snapshot(),
        },
    )
}

fn method_not_allowed(method: &str, path: &str) -> HttpResponse {
    HttpResponse::json(
        405,
        &json!({"kind": "MethodNotAllowed", "message": format!("{} is not supported on {}", method, path)}),
    )
}

async fn list_tables(state: &AppState, request: &HttpRequest) -> Result<HttpResponse> {
    let list = state.service.list_tables(token(request)?).await?;
    Ok(HttpResponse::json(200, &list))
}

async fn read_rows(state: &AppState, request: &HttpRequest, raw: &str) -> Result<HttpResponse> {
    let token = token(request)?;
    if let Some(key) = request.query.iter().map(|(k, _)| k).duplicates().next() {
        return Err(GatewayError::validation(format!(
            "query parameter '{}' given more than once",
            key
        )));
    }
    let limit = match request.query_param("limit") {
        Some(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|_| GatewayError::validation(format!("limit must be a positive integer, got '{}'", raw)))?,
        ),
        None => None,
    };
    let read = ReadRequest {
        table: table_name(raw)?,
        filter: FilterSpec::from_pairs(request.query.iter().filter(|(k, _)| k != "limit").cloned()),
        limit,
    };
    let rows = state.service.read_rows(token, &read).await?;
    Ok(HttpResponse::json(200, &rows))
}

async fn insert_rows(state: &AppState, request: &HttpRequest, raw: &str) -> Result<HttpResponse> {
    let token = token(request)?;
    let payload: InsertPayload = request.json()?;
    let insert = InsertRequest {
        table: table_name(raw)?,
        rows: payload.data,
    };
    let outcome = state.service.insert_rows(token, &insert).await?;
    let status = match outcome.status {
        InsertStatus::Success => 200,
        InsertStatus::PartialSuccess => 207,
    };
    Ok(HttpResponse::json(status, &outcome))
}

async fn update_rows(state: &AppState, request: &HttpRequest, raw: &str) -> Result<HttpResponse> {
    let token = token(request)?;
    let payload: UpdatePayload = request.json()?;
    let update = UpdateRequest {
        table: table_name(raw)?,
        filter: payload.filter,
        updates: payload.updates,
        upsert: payload.upsert,
    };
    let outcome = state.service.update_rows(token, &update).await?;
    Ok(HttpResponse::json(200, &outcome))
}

async fn delete_rows(state: &AppState, request: &HttpRequest, raw: &str) -> Result<HttpResponse> {
    let token = token(request)?;
    let payload: DeletePayload = request.json()?;
    let delete = DeleteRequest {
        table: table_name(raw)?,
        filter: payload.filter,
    };
    let outcome = state.service.delete_rows(token, &delete).await?;
    Ok(HttpResponse::json(200, &outcome))
}

async fn create_table(state: &AppState, request: &HttpRequest) -> Result<HttpResponse> {
    let token = token(request)?;
    let create: CreateTableRequest = request.json()?;
    let outcome = state.service.create_table(token, &create).await?;
    Ok(HttpResponse::json(201, &outcome))
}

async fn drop_table(state: &AppState, request: &HttpRequest, raw: &str) -> Result<HttpResponse> {
    let token = token(request)?;
    let drop = DropTableRequest {
        table_name: table_name(raw)?,
    };
    let outcome = state.service.drop_table(token, &drop).await?;
    Ok(HttpResponse::json(200, &outcome))
}
