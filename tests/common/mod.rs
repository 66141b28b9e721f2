//! In-memory warehouse used by the integration tests.
//!
//! `MemoryWarehouse` implements both `RemoteEngine` and `CatalogSource`. It
//! interprets exactly the statement shapes the compiler emits, binding
//! parameters by name, so tests observe real data effects.

#![allow(dead_code)]

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supabricks::auth::{IdentityVerifier, Principal};
use supabricks::catalog::{CatalogDirectory, DiscoveryService, ReservedNamespaces};
use supabricks::compiler::{CompilerLimits, Statement, StatementCompiler, StatementKind};
use supabricks::execution::{
    CatalogSource, ExecutionContext, ExecutionGateway, RemoteColumn, RemoteEngine, RemoteError, RemoteRows,
    RemoteTable, RetryPolicy,
};
use supabricks::observability::GatewayMetrics;
use supabricks::service::TableService;
use supabricks::GatewayError;

pub const TOKEN: &str = "dapi-test-token";

lazy_static! {
    static ref PREDICATE: Regex = Regex::new(r"^`((?:[^`]|``)+)` (?:= :(p\d+)|IS NULL)$").unwrap();
    static ref IDENT: Regex = Regex::new(r"`((?:[^`]|``)+)`").unwrap();
    static ref MARKER: Regex = Regex::new(r":(p\d+)").unwrap();
    static ref VALUE_CELL: Regex = Regex::new(r":(p\d+)|\bDEFAULT\b").unwrap();
    static ref SOURCE_REF: Regex = Regex::new(r"source\.`(p\d+)`").unwrap();
    static ref ASSIGN: Regex = Regex::new(r"target\.`((?:[^`]|``)+)` = source\.`(p\d+)`").unwrap();
    static ref COLUMN_DEF: Regex = Regex::new(r"`((?:[^`]|``)+)` ([A-Z]+(?:\(\d+,\d+\))?)( NOT NULL)?").unwrap();
    static ref LIMIT: Regex = Regex::new(r" LIMIT (\d+)$").unwrap();
}

type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone)]
pub struct MemColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct MemTable {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub table_type: String,
    pub columns: Vec<MemColumn>,
    pub rows: Vec<Map<String, Value>>,
}

impl MemTable {
    fn column(&self, name: &str) -> RemoteResult<&MemColumn> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| RemoteError::Semantic(format!("[UNRESOLVED_COLUMN] column `{}` cannot be resolved", name)))
    }

    fn check_not_null(&self, row: &Map<String, Value>) -> RemoteResult<()> {
        for column in self.columns.iter().filter(|c| !c.nullable) {
            if row.get(&column.name).map_or(true, Value::is_null) {
                return Err(RemoteError::Semantic(format!(
                    "[DELTA_NOT_NULL_CONSTRAINT_VIOLATED] NOT NULL constraint violated for column: {}",
                    column.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWarehouse {
    tables: Mutex<BTreeMap<String, MemTable>>,
    /// Consumed one per execute call; `None` lets the call run normally.
    script: Mutex<VecDeque<Option<RemoteError>>>,
    catalog_failures: Mutex<VecDeque<RemoteError>>,
    executed: Mutex<Vec<Statement>>,
    calls: AtomicUsize,
    catalog_calls: AtomicUsize,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table. Columns are `(name, type, nullable)`.
    pub fn with_table(self, full_name: &str, columns: &[(&str, &str, bool)]) -> Self {
        self.insert_table(full_name, "MANAGED", columns);
        self
    }

    pub fn with_view(self, full_name: &str, columns: &[(&str, &str, bool)]) -> Self {
        self.insert_table(full_name, "VIEW", columns);
        self
    }

    /// Add a table behind the gateway's back, as another client would.
    pub fn add_table(&self, full_name: &str, columns: &[(&str, &str, bool)]) {
        self.insert_table(full_name, "MANAGED", columns);
    }

    fn insert_table(&self, full_name: &str, table_type: &str, columns: &[(&str, &str, bool)]) {
        let parts: Vec<&str> = full_name.split('.').collect();
        let table = MemTable {
            catalog: parts[0].to_string(),
            schema: parts[1].to_string(),
            name: parts[2].to_string(),
            table_type: table_type.to_string(),
            columns: columns
                .iter()
                .map(|(name, data_type, nullable)| MemColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                    nullable: *nullable,
                })
                .collect(),
            rows: Vec::new(),
        };
        self.tables.lock().unwrap().insert(full_name.to_ascii_lowercase(), table);
    }

    pub fn seed_row(&self, full_name: &str, row: Value) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(&full_name.to_ascii_lowercase()).expect("seeded table exists");
        table.rows.push(row.as_object().cloned().expect("row is an object"));
    }

    pub fn rows(&self, full_name: &str) -> Vec<Map<String, Value>> {
        self.tables
            .lock()
            .unwrap()
            .get(&full_name.to_ascii_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, full_name: &str) -> bool {
        self.tables.lock().unwrap().contains_key(&full_name.to_ascii_lowercase())
    }

    pub fn fail_next(&self, err: RemoteError) {
        self.script.lock().unwrap().push_back(Some(err));
    }

    pub fn succeed_next(&self) {
        self.script.lock().unwrap().push_back(None);
    }

    pub fn fail_next_catalog(&self, err: RemoteError) {
        self.catalog_failures.lock().unwrap().push_back(err);
    }

    /// Number of `execute` calls, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<Statement> {
        self.executed.lock().unwrap().clone()
    }

    fn interpret(&self, statement: &Statement) -> RemoteResult<RemoteRows> {
        let key = statement.target().to_ascii_lowercase();
        let mut tables = self.tables.lock().unwrap();

        match statement.kind() {
            StatementKind::CreateTable => {
                if tables.contains_key(&key) {
                    return Err(RemoteError::Semantic(format!(
                        "[TABLE_OR_VIEW_ALREADY_EXISTS] {}",
                        statement.target()
                    )));
                }
                let table = parse_create(statement)?;
                tables.insert(key, table);
                Ok(RemoteRows::empty())
            }
            StatementKind::DropTable => match tables.remove(&key) {
                Some(_) => Ok(RemoteRows::empty()),
                None => Err(table_not_found(statement)),
            },
            kind => {
                let table = tables.get_mut(&key).ok_or_else(|| table_not_found(statement))?;
                match kind {
                    StatementKind::Select => select(table, statement),
                    StatementKind::Insert => insert(table, statement),
                    StatementKind::Merge => merge(table, statement),
                    StatementKind::Delete => delete(table, statement),
                    _ => unreachable!("handled above"),
                }
            }
        }
    }
}

#[async_trait]
impl RemoteEngine for MemoryWarehouse {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, _ctx: &ExecutionContext, statement: &Statement) -> RemoteResult<RemoteRows> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(statement.clone());
        if let Some(Some(err)) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.interpret(statement)
    }
}

#[async_trait]
impl CatalogSource for MemoryWarehouse {
    async fn list_remote_tables(&self) -> RemoteResult<Vec<RemoteTable>> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.catalog_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .values()
            .map(|t| RemoteTable {
                catalog: t.catalog.clone(),
                schema: t.schema.clone(),
                name: t.name.clone(),
                table_type: t.table_type.clone(),
                comment: None,
                columns: t
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| RemoteColumn {
                        name: c.name.clone(),
                        ordinal: i as u32 + 1,
                        data_type: c.data_type.clone(),
                        is_nullable: if c.nullable { "YES" } else { "NO" }.to_string(),
                        comment: None,
                    })
                    .collect(),
            })
            .collect())
    }
}

fn table_not_found(statement: &Statement) -> RemoteError {
    RemoteError::Semantic(format!(
        "[TABLE_OR_VIEW_NOT_FOUND] The table or view {} cannot be found",
        statement.target()
    ))
}

fn unquote(raw: &str) -> String {
    raw.replace("``", "`")
}

fn param(statement: &Statement, name: &str) -> RemoteResult<Value> {
    statement
        .param(name)
        .map(|p| p.value.to_json())
        .ok_or_else(|| RemoteError::Semantic(format!("[UNBOUND_SQL_PARAMETER] :{} is not bound", name)))
}

/// Text after the quoted three-part table name.
fn after_table(sql: &str) -> &str {
    let mut end = 0;
    for found in IDENT.find_iter(sql).take(3) {
        end = found.end();
    }
    &sql[end..]
}

fn where_predicates(statement: &Statement) -> RemoteResult<Vec<(String, Value)>> {
    let sql = statement.sql();
    let Some(start) = sql.find(" WHERE ") else {
        return Ok(Vec::new());
    };
    let clause = &sql[start + " WHERE ".len()..];
    let clause = LIMIT.replace(clause, "");

    clause
        .split(" AND ")
        .map(|predicate| -> RemoteResult<(String, Value)> {
            let caps = PREDICATE
                .captures(predicate)
                .ok_or_else(|| RemoteError::Semantic(format!("[PARSE_SYNTAX_ERROR] near '{}'", predicate)))?;
            let column = unquote(&caps[1]);
            let value = match caps.get(2) {
                Some(name) => param(statement, name.as_str())?,
                None => Value::Null,
            };
            Ok((column, value))
        })
        .collect()
}

fn matches(row: &Map<String, Value>, predicates: &[(String, Value)]) -> bool {
    predicates
        .iter()
        .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
}

fn select(table: &MemTable, statement: &Statement) -> RemoteResult<RemoteRows> {
    let predicates = where_predicates(statement)?;
    for (column, _) in &predicates {
        table.column(column)?;
    }
    let limit = LIMIT
        .captures(statement.sql())
        .and_then(|c| c[1].parse::<usize>().ok())
        .unwrap_or(usize::MAX);

    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    let rows = table
        .rows
        .iter()
        .filter(|row| matches(row, &predicates))
        .take(limit)
        .map(|row| columns.iter().map(|c| row.get(c).cloned().unwrap_or(Value::Null)).collect())
        .collect();
    Ok(RemoteRows {
        columns,
        rows,
        affected_rows: None,
    })
}

fn insert(table: &mut MemTable, statement: &Statement) -> RemoteResult<RemoteRows> {
    let sql = statement.sql();
    let split = sql
        .find(") VALUES ")
        .ok_or_else(|| RemoteError::Semantic("[PARSE_SYNTAX_ERROR] missing VALUES".to_string()))?;
    let columns: Vec<String> = IDENT
        .captures_iter(after_table(&sql[..split]))
        .map(|c| unquote(&c[1]))
        .collect();
    for column in &columns {
        table.column(column)?;
    }

    // DEFAULT cells leave the column unset; tables here carry no defaults.
    let values: Vec<Option<Value>> = VALUE_CELL
        .captures_iter(&sql[split..])
        .map(|c| c.get(1).map(|name| param(statement, name.as_str())).transpose())
        .collect::<RemoteResult<_>>()?;
    if columns.is_empty() || values.len() % columns.len() != 0 {
        return Err(RemoteError::Semantic(
            "[INSERT_COLUMN_ARITY_MISMATCH] value count does not match column count".to_string(),
        ));
    }

    let rows: Vec<Map<String, Value>> = values
        .chunks(columns.len())
        .map(|chunk| {
            columns
                .iter()
                .zip(chunk)
                .filter_map(|(column, value)| value.clone().map(|v| (column.clone(), v)))
                .collect()
        })
        .collect();
    for row in &rows {
        table.check_not_null(row)?;
    }
    let count = rows.len() as u64;
    table.rows.extend(rows);
    Ok(RemoteRows::affected(count))
}

fn merge(table: &mut MemTable, statement: &Statement) -> RemoteResult<RemoteRows> {
    let sql = statement.sql();
    let on_start = sql
        .find(" ON ")
        .ok_or_else(|| RemoteError::Semantic("[PARSE_SYNTAX_ERROR] missing ON".to_string()))?;
    let matched = sql
        .find(" WHEN MATCHED THEN UPDATE SET ")
        .ok_or_else(|| RemoteError::Semantic("[PARSE_SYNTAX_ERROR] missing WHEN MATCHED".to_string()))?;
    let not_matched = sql.find(" WHEN NOT MATCHED THEN INSERT ");

    let pairs = |text: &str| -> RemoteResult<Vec<(String, Value)>> {
        ASSIGN
            .captures_iter(text)
            .map(|c| -> RemoteResult<(String, Value)> { Ok((unquote(&c[1]), param(statement, &c[2])?)) })
            .collect()
    };
    let keys = pairs(&sql[on_start..matched])?;
    let sets = pairs(&sql[matched..not_matched.unwrap_or(sql.len())])?;
    for (column, _) in keys.iter().chain(sets.iter()) {
        table.column(column)?;
    }

    let mut updated: Vec<Map<String, Value>> = Vec::new();
    let mut count = 0u64;
    for row in table.rows.iter() {
        let mut row = row.clone();
        if matches(&row, &keys) {
            for (column, value) in &sets {
                row.insert(column.clone(), value.clone());
            }
            table.check_not_null(&row)?;
            count += 1;
        }
        updated.push(row);
    }

    if count == 0 {
        if let Some(start) = not_matched {
            let clause = &sql[start..];
            let values_at = clause
                .find(" VALUES ")
                .ok_or_else(|| RemoteError::Semantic("[PARSE_SYNTAX_ERROR] missing VALUES".to_string()))?;
            let columns: Vec<String> = IDENT
                .captures_iter(&clause[..values_at])
                .map(|c| unquote(&c[1]))
                .collect();
            let values: Vec<Value> = SOURCE_REF
                .captures_iter(&clause[values_at..])
                .map(|c| param(statement, &c[1]))
                .collect::<RemoteResult<_>>()?;
            let row: Map<String, Value> = columns.into_iter().zip(values).collect();
            table.check_not_null(&row)?;
            updated.push(row);
            count = 1;
        }
    }

    table.rows = updated;
    Ok(RemoteRows::affected(count))
}

fn delete(table: &mut MemTable, statement: &Statement) -> RemoteResult<RemoteRows> {
    let predicates = where_predicates(statement)?;
    for (column, _) in &predicates {
        table.column(column)?;
    }
    let before = table.rows.len();
    table.rows.retain(|row| !matches(row, &predicates));
    Ok(RemoteRows::affected((before - table.rows.len()) as u64))
}

fn parse_create(statement: &Statement) -> RemoteResult<MemTable> {
    let parts: Vec<&str> = statement.target().split('.').collect();
    let mut seen = HashSet::new();
    let columns: Vec<MemColumn> = COLUMN_DEF
        .captures_iter(after_table(statement.sql()))
        .map(|c| MemColumn {
            name: unquote(&c[1]),
            data_type: c[2].to_ascii_lowercase(),
            nullable: c.get(3).is_none(),
        })
        .filter(|c| seen.insert(c.name.to_ascii_lowercase()))
        .collect();
    if columns.is_empty() {
        return Err(RemoteError::Semantic("[PARSE_SYNTAX_ERROR] no columns".to_string()));
    }
    Ok(MemTable {
        catalog: parts[0].to_string(),
        schema: parts[1].to_string(),
        name: parts[2].to_string(),
        table_type: "MANAGED".to_string(),
        columns,
        rows: Vec::new(),
    })
}

/// Accepts `TOKEN` and any token starting with `user:`; rejects everything else.
pub struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> supabricks::Result<Principal> {
        if token == TOKEN {
            return Ok(Principal::new("tester@example.com", token));
        }
        match token.strip_prefix("user:") {
            Some(user) => Ok(Principal::new(user, token)),
            None => Err(GatewayError::Unauthenticated("invalid token".to_string())),
        }
    }
}

pub struct Harness {
    pub warehouse: Arc<MemoryWarehouse>,
    pub directory: CatalogDirectory,
    pub discovery: DiscoveryService,
    pub service: TableService,
    pub metrics: Arc<GatewayMetrics>,
}

impl Harness {
    pub fn new(warehouse: MemoryWarehouse) -> Self {
        Self::with_limits(warehouse, CompilerLimits::default())
    }

    pub fn with_limits(warehouse: MemoryWarehouse, limits: CompilerLimits) -> Self {
        let warehouse = Arc::new(warehouse);
        let metrics = Arc::new(GatewayMetrics::new());
        let directory = CatalogDirectory::new();
        let discovery = DiscoveryService::new(
            warehouse.clone(),
            directory.clone(),
            ReservedNamespaces::default(),
            metrics.clone(),
        );
        let gateway = ExecutionGateway::new(
            warehouse.clone(),
            RetryPolicy::fixed(2, Duration::from_millis(1)),
            metrics.clone(),
        );
        let service = TableService::new(
            directory.clone(),
            StatementCompiler::new(limits, ReservedNamespaces::default()),
            gateway,
            Arc::new(StaticVerifier),
            Duration::from_secs(5),
        );
        Self {
            warehouse,
            directory,
            discovery,
            service,
            metrics,
        }
    }

    /// Build and run one discovery cycle.
    pub async fn discovered(warehouse: MemoryWarehouse) -> Self {
        let harness = Self::new(warehouse);
        harness.discovery.run_cycle().await.expect("initial discovery");
        harness
    }
}

pub fn row(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("row literal is an object")
}
