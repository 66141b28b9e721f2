//! Table Service
//!
//! The request-path facade. Each operation verifies the caller, resolves the
//! table in the current directory snapshot, compiles and executes. Nothing on
//! this path mutates the directory.

use crate::auth::{IdentityVerifier, Principal};
use crate::catalog::{CatalogDirectory, ColumnDescriptor, TableDescriptor};
use crate::compiler::{
    CreateTableRequest, DeleteRequest, DropTableRequest, InsertRequest, ReadRequest, Row, Statement,
    StatementCompiler, StatementKind, UpdateRequest,
};
use crate::error::{ErrorBody, Result};
use crate::execution::{ExecutionContext, ExecutionGateway};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub full_name: String,
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl From<&TableDescriptor> for TableSummary {
    fn from(table: &TableDescriptor) -> Self {
        Self {
            full_name: table.full_name(),
            catalog: table.catalog.clone(),
            schema: table.schema.clone(),
            name: table.name.clone(),
            columns: table.columns.clone(),
            comment: table.comment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableList {
    pub tables: Vec<TableSummary>,
    pub count: usize,
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSet {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub table: String,
    pub operation: StatementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InsertStatus {
    Success,
    PartialSuccess,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub first_row: usize,
    pub row_count: usize,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOutcome {
    pub table: String,
    pub status: InsertStatus,
    pub inserted_rows: usize,
    pub failed_batches: Vec<FailedBatch>,
    /// Rows after the failed batch that were never submitted.
    pub skipped_rows: usize,
    pub request_id: Uuid,
}

pub struct TableService {
    directory: CatalogDirectory,
    compiler: StatementCompiler,
    gateway: ExecutionGateway,
    verifier: Arc<dyn IdentityVerifier>,
    statement_timeout: Duration,
}

impl TableService {
    pub fn new(
        directory: CatalogDirectory,
        compiler: StatementCompiler,
        gateway: ExecutionGateway,
        verifier: Arc<dyn IdentityVerifier>,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            compiler,
            gateway,
            verifier,
            statement_timeout,
        }
    }

    pub fn directory(&self) -> &CatalogDirectory {
        &self.directory
    }

    async fn authorize(&self, token: &str) -> Result<ExecutionContext> {
        let principal: Principal = self.verifier.verify(token).await?;
        let ctx = ExecutionContext::new(principal, self.statement_timeout);
        info!(request_id = %ctx.request_id, user = %ctx.principal.user_name, "request authorized");
        Ok(ctx)
    }

    pub async fn list_tables(&self, token: &str) -> Result<TableList> {
        self.authorize(token).await?;
        let snapshot = self.directory.snapshot();
        let tables: Vec<TableSummary> = self
            .compiler
            .list_tables(&snapshot)
            .iter()
            .map(|t| TableSummary::from(t.as_ref()))
            .collect();
        Ok(TableList {
            count: tables.len(),
            tables,
            generation: snapshot.generation(),
            refreshed_at: snapshot.refreshed_at(),
        })
    }

    pub async fn read_rows(&self, token: &str, request: &ReadRequest) -> Result<RowSet> {
        let ctx = self.authorize(token).await?;
        let table = self.directory.snapshot().require(&request.table)?;
        let statement = self.compiler.compile_read(&table, request)?;
        let limit = request.limit.unwrap_or(self.compiler.limits().default_row_limit);

        let execution = self.gateway.execute(&ctx, &statement).await?;
        let rows = execution.rows.to_records();
        Ok(RowSet {
            table: table.full_name(),
            columns: execution.rows.columns,
            row_count: rows.len(),
            rows,
            limit,
        })
    }

    /// Batches run in order; the first failure stops the rest.
    pub async fn insert_rows(&self, token: &str, request: &InsertRequest) -> Result<InsertOutcome> {
        let ctx = self.authorize(token).await?;
        let table = self.directory.snapshot().require(&request.table)?;
        let batches = self.compiler.compile_insert(&table, request)?;
        let total_rows = request.rows.len();

        let mut outcome = InsertOutcome {
            table: table.full_name(),
            status: InsertStatus::Success,
            inserted_rows: 0,
            failed_batches: Vec::new(),
            skipped_rows: 0,
            request_id: ctx.request_id,
        };

        for (index, batch) in batches.iter().enumerate() {
            match self.gateway.execute(&ctx, &batch.statement).await {
                Ok(_) => outcome.inserted_rows += batch.row_count,
                Err(err) if index == 0 => return Err(err),
                Err(err) => {
                    let skipped = total_rows - (batch.first_row + batch.row_count);
                    warn!(
                        request_id = %ctx.request_id,
                        table = %outcome.table,
                        first_row = batch.first_row,
                        inserted = outcome.inserted_rows,
                        skipped,
                        "insert batch failed: {}",
                        err.message()
                    );
                    outcome.status = InsertStatus::PartialSuccess;
                    outcome.failed_batches.push(FailedBatch {
                        first_row: batch.first_row,
                        row_count: batch.row_count,
                        error: err.to_body(),
                    });
                    outcome.skipped_rows = skipped;
                    break;
                }
            }
        }

        info!(
            request_id = %ctx.request_id,
            table = %outcome.table,
            "inserted {} of {} rows",
            outcome.inserted_rows,
            total_rows
        );
        Ok(outcome)
    }

    pub async fn update_rows(&self, token: &str, request: &UpdateRequest) -> Result<MutationOutcome> {
        let ctx = self.authorize(token).await?;
        let table = self.directory.snapshot().require(&request.table)?;
        let statement = self.compiler.compile_update(&table, request)?;
        self.mutate(&ctx, &statement).await
    }

    pub async fn delete_rows(&self, token: &str, request: &DeleteRequest) -> Result<MutationOutcome> {
        let ctx = self.authorize(token).await?;
        let table = self.directory.snapshot().require(&request.table)?;
        let statement = self.compiler.compile_delete(&table, request)?;
        self.mutate(&ctx, &statement).await
    }

    /// The new table becomes visible after the next discovery cycle.
    pub async fn create_table(&self, token: &str, request: &CreateTableRequest) -> Result<MutationOutcome> {
        let ctx = self.authorize(token).await?;
        let statement = self.compiler.compile_create(&self.directory.snapshot(), request)?;
        self.mutate(&ctx, &statement).await
    }

    /// The dropped table stays listed until the next discovery cycle.
    pub async fn drop_table(&self, token: &str, request: &DropTableRequest) -> Result<MutationOutcome> {
        let ctx = self.authorize(token).await?;
        let statement = self.compiler.compile_drop(&self.directory.snapshot(), request)?;
        self.mutate(&ctx, &statement).await
    }

    async fn mutate(&self, ctx: &ExecutionContext, statement: &Statement) -> Result<MutationOutcome> {
        let execution = self.gateway.execute(ctx, statement).await?;
        info!(
            request_id = %ctx.request_id,
            table = statement.target(),
            attempts = execution.trace.attempts,
            "{:?} completed",
            statement.kind()
        );
        Ok(MutationOutcome {
            table: statement.target().to_string(),
            operation: statement.kind(),
            affected_rows: execution.rows.affected_rows,
            request_id: ctx.request_id,
        })
    }
}
