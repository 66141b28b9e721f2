//! Statement Compiler
//!
//! Translates typed requests plus a catalog descriptor into parameterized
//! statements. Every column named by a request is resolved against the
//! descriptor before any SQL is produced, and every value is bound through
//! `StatementBuilder::bind`.

use crate::catalog::descriptor::{ColumnDescriptor, SqlType, TableDescriptor};
use crate::catalog::directory::CatalogSnapshot;
use crate::catalog::namespaces::ReservedNamespaces;
use crate::compiler::ident::{Ident, QualifiedName};
use crate::compiler::request::{
    CreateTableRequest, DeleteRequest, DropTableRequest, FilterSpec, InsertRequest, ReadRequest, UpdateRequest,
};
use crate::compiler::statement::{Statement, StatementBuilder, StatementKind};
use crate::compiler::value::SqlValue;
use crate::error::{GatewayError, Result};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerLimits {
    pub default_row_limit: u64,
    pub max_row_limit: u64,
    pub insert_batch_size: usize,
}

impl Default for CompilerLimits {
    fn default() -> Self {
        Self {
            default_row_limit: 100,
            max_row_limit: 10_000,
            insert_batch_size: 500,
        }
    }
}

/// One `INSERT` statement covering `row_count` request rows starting at `first_row`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub first_row: usize,
    pub row_count: usize,
    pub statement: Statement,
}

struct Predicate {
    column: Ident,
    sql_type: SqlType,
    value: Option<SqlValue>,
}

#[derive(Debug, Clone, Default)]
pub struct StatementCompiler {
    limits: CompilerLimits,
    reserved: ReservedNamespaces,
}

impl StatementCompiler {
    pub fn new(limits: CompilerLimits, reserved: ReservedNamespaces) -> Self {
        Self { limits, reserved }
    }

    pub fn limits(&self) -> &CompilerLimits {
        &self.limits
    }

    pub fn reserved(&self) -> &ReservedNamespaces {
        &self.reserved
    }

    /// Visible tables of the snapshot. Permission filtering is left to the
    /// remote engine.
    pub fn list_tables(&self, snapshot: &CatalogSnapshot) -> Vec<Arc<TableDescriptor>> {
        snapshot.visible_tables(&self.reserved).cloned().collect()
    }

    pub fn compile_read(&self, table: &TableDescriptor, request: &ReadRequest) -> Result<Statement> {
        let limit = self.resolve_limit(request.limit)?;
        let predicates = equality_predicates(table, &request.filter)?;

        let mut builder = StatementBuilder::new(StatementKind::Select, QualifiedName::of(table));
        builder.push("SELECT * FROM ").table();
        write_where(&mut builder, predicates);
        builder.limit(limit);
        Ok(finish(builder))
    }

    pub fn compile_insert(&self, table: &TableDescriptor, request: &InsertRequest) -> Result<Vec<InsertBatch>> {
        if request.rows.is_empty() {
            return Err(GatewayError::validation("insert payload contains no rows"));
        }

        let width = table.columns.len();
        let mut present = vec![false; width];
        let mut positioned: Vec<Vec<Option<&Value>>> = Vec::with_capacity(request.rows.len());

        for (index, row) in request.rows.iter().enumerate() {
            if row.is_empty() {
                return Err(GatewayError::validation(format!("row {} is empty", index)));
            }
            let mut values: Vec<Option<&Value>> = vec![None; width];
            for (name, value) in row {
                let position = table
                    .column_position(name)
                    .ok_or_else(|| in_row(index, unknown_column(table, name)))?;
                if values[position].is_some() {
                    return Err(in_row(index, duplicate_column(name)));
                }
                values[position] = Some(value);
                present[position] = true;
            }

            let missing: Vec<String> = table
                .columns
                .iter()
                .zip(&values)
                .filter(|(column, value)| !column.nullable && value.is_none())
                .map(|(column, _)| format!("'{}'", column.name))
                .collect();
            if !missing.is_empty() {
                return Err(GatewayError::validation(format!(
                    "row {}: missing required column(s) {}",
                    index,
                    missing.iter().join(", ")
                )));
            }
            positioned.push(values);
        }

        let positions: Vec<usize> = (0..width).filter(|&p| present[p]).collect();
        let idents: Vec<Ident> = positions.iter().map(|&p| Ident::trusted(&table.columns[p].name)).collect();

        // Cells a row omits stay `None` and compile to DEFAULT, so column
        // defaults apply even when other rows in the batch supply the column.
        let mut rows: Vec<Vec<Option<SqlValue>>> = Vec::with_capacity(positioned.len());
        for (index, values) in positioned.iter().enumerate() {
            let coerced = positions
                .iter()
                .map(|&p| values[p].map(|v| SqlValue::coerce(&table.columns[p], v)).transpose())
                .collect::<Result<Vec<_>>>()
                .map_err(|e| in_row(index, e))?;
            rows.push(coerced);
        }

        let batch_size = self.limits.insert_batch_size.max(1);
        let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_size));
        for (chunk_index, chunk) in rows.chunks(batch_size).enumerate() {
            let mut builder = StatementBuilder::new(StatementKind::Insert, QualifiedName::of(table));
            builder
                .push("INSERT INTO ")
                .table()
                .push(" (")
                .ident_list(&idents)
                .push(") VALUES ");
            for (r, row) in chunk.iter().enumerate() {
                builder.push(if r == 0 { "(" } else { ", (" });
                for (c, value) in row.iter().enumerate() {
                    if c > 0 {
                        builder.push(", ");
                    }
                    match value {
                        Some(value) => {
                            builder.bind(value.clone(), &table.columns[positions[c]].sql_type);
                        }
                        None => {
                            builder.push("DEFAULT");
                        }
                    }
                }
                builder.push(")");
            }
            batches.push(InsertBatch {
                first_row: chunk_index * batch_size,
                row_count: chunk.len(),
                statement: finish(builder),
            });
        }
        Ok(batches)
    }

    /// Merge-based update. The filter becomes the match condition; the
    /// single-row source carries both filter and update values.
    pub fn compile_update(&self, table: &TableDescriptor, request: &UpdateRequest) -> Result<Statement> {
        if request.filter.is_empty() {
            return Err(GatewayError::validation(
                "update requires a non-empty filter; unconditional updates are not permitted",
            ));
        }
        if request.updates.is_empty() {
            return Err(GatewayError::validation("update requires at least one column in 'updates'"));
        }

        let mut seen = HashSet::new();
        let mut keys: Vec<(&ColumnDescriptor, SqlValue)> = Vec::with_capacity(request.filter.len());
        for (name, value) in request.filter.iter() {
            let column = resolve_column(table, name)?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(duplicate_column(name));
            }
            match value {
                Value::Null => {
                    return Err(GatewayError::validation(format!(
                        "filter value for column '{}' must not be null in an update",
                        name
                    )))
                }
                Value::Array(_) | Value::Object(_) => return Err(unsupported_operator(name)),
                scalar => keys.push((column, SqlValue::coerce(column, scalar)?)),
            }
        }

        let mut seen = HashSet::new();
        let mut sets: Vec<(&ColumnDescriptor, SqlValue)> = Vec::with_capacity(request.updates.len());
        for (name, value) in &request.updates {
            let column = resolve_column(table, name)?;
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(duplicate_column(name));
            }
            sets.push((column, SqlValue::coerce(column, value)?));
        }

        if request.upsert {
            let missing: Vec<String> = table
                .required_columns()
                .filter(|c| !keys.iter().chain(sets.iter()).any(|(k, _)| k.name == c.name))
                .map(|c| format!("'{}'", c.name))
                .collect();
            if !missing.is_empty() {
                return Err(GatewayError::validation(format!(
                    "upsert requires non-nullable column(s) {} in filter or updates",
                    missing.iter().join(", ")
                )));
            }
        }

        let mut builder = StatementBuilder::new(StatementKind::Merge, QualifiedName::of(table));
        builder.push("MERGE INTO ").table().push(" AS target USING (SELECT ");

        let mut key_aliases: Vec<(Ident, Ident)> = Vec::with_capacity(keys.len());
        let mut set_aliases: Vec<(Ident, Ident)> = Vec::with_capacity(sets.len());
        for (i, (column, value)) in keys.into_iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            let alias = Ident::trusted(&builder.bind(value, &column.sql_type));
            builder.push(" AS ").ident(&alias);
            key_aliases.push((Ident::trusted(&column.name), alias));
        }
        for (column, value) in sets {
            builder.push(", ");
            let alias = Ident::trusted(&builder.bind(value, &column.sql_type));
            builder.push(" AS ").ident(&alias);
            set_aliases.push((Ident::trusted(&column.name), alias));
        }

        builder.push(") AS source ON ");
        for (i, (column, alias)) in key_aliases.iter().enumerate() {
            if i > 0 {
                builder.push(" AND ");
            }
            builder
                .qualified_ident("target", column)
                .push(" = ")
                .qualified_ident("source", alias);
        }

        builder.push(" WHEN MATCHED THEN UPDATE SET ");
        for (i, (column, alias)) in set_aliases.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder
                .qualified_ident("target", column)
                .push(" = ")
                .qualified_ident("source", alias);
        }

        if request.upsert {
            // Update values win over filter values for a column named in both.
            let inserted: Vec<(&Ident, &Ident)> = table
                .columns
                .iter()
                .filter_map(|c| {
                    set_aliases
                        .iter()
                        .chain(key_aliases.iter())
                        .find(|(column, _)| column.as_str() == c.name)
                        .map(|(column, alias)| (column, alias))
                })
                .collect();

            builder
                .push(" WHEN NOT MATCHED THEN INSERT (")
                .ident_list(inserted.iter().map(|(column, _)| *column))
                .push(") VALUES (");
            for (i, (_, alias)) in inserted.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.qualified_ident("source", alias);
            }
            builder.push(")");
        }

        Ok(finish(builder))
    }

    pub fn compile_delete(&self, table: &TableDescriptor, request: &DeleteRequest) -> Result<Statement> {
        if request.filter.is_empty() {
            return Err(GatewayError::validation(
                "delete requires a non-empty filter; use drop to remove a whole table",
            ));
        }
        let predicates = equality_predicates(table, &request.filter)?;

        let mut builder = StatementBuilder::new(StatementKind::Delete, QualifiedName::of(table));
        builder.push("DELETE FROM ").table();
        write_where(&mut builder, predicates);
        Ok(finish(builder))
    }

    pub fn compile_create(&self, snapshot: &CatalogSnapshot, request: &CreateTableRequest) -> Result<Statement> {
        let name = QualifiedName::parse(&request.table_name)?;
        if self.reserved.excludes(name.catalog.as_str(), name.schema.as_str()) {
            return Err(GatewayError::validation(format!(
                "cannot create table '{}' in a reserved namespace",
                name
            )));
        }
        if snapshot.contains(&name.to_string()) {
            return Err(GatewayError::validation(format!("table '{}' already exists", name)));
        }
        if request.columns.is_empty() {
            return Err(GatewayError::validation("create table requires at least one column"));
        }

        let mut seen = HashSet::new();
        let mut columns: Vec<(Ident, SqlType, bool, Option<&String>)> = Vec::with_capacity(request.columns.len());
        for (index, definition) in request.columns.iter().enumerate() {
            let raw = definition.name.trim();
            if raw.is_empty() {
                return Err(GatewayError::validation(format!("column {} has an empty name", index)));
            }
            let ident = Ident::parse(raw)
                .map_err(|e| GatewayError::validation(format!("column {}: {}", index, e.message())))?;
            if !seen.insert(raw.to_ascii_lowercase()) {
                return Err(duplicate_column(raw));
            }
            let sql_type = SqlType::parse(&definition.type_name)
                .map_err(|e| GatewayError::validation(format!("column '{}': {}", raw, e.message())))?;
            if !sql_type.is_supported_for_create() {
                return Err(GatewayError::validation(format!(
                    "column '{}': unsupported column type '{}'",
                    raw, definition.type_name
                )));
            }
            columns.push((ident, sql_type, definition.nullable, definition.comment.as_ref()));
        }

        let mut partitions: Vec<Ident> = Vec::with_capacity(request.partitioned_by.len());
        for partition in &request.partitioned_by {
            let ident = columns
                .iter()
                .find(|(ident, ..)| ident.as_str().eq_ignore_ascii_case(partition.trim()))
                .map(|(ident, ..)| ident.clone())
                .ok_or_else(|| {
                    GatewayError::validation(format!("partition column '{}' is not a defined column", partition))
                })?;
            if partitions.contains(&ident) {
                return Err(GatewayError::validation(format!(
                    "partition column '{}' listed more than once",
                    partition
                )));
            }
            partitions.push(ident);
        }

        let mut builder = StatementBuilder::new(StatementKind::CreateTable, name);
        builder.push("CREATE TABLE ").table().push(" (");
        for (i, (ident, sql_type, nullable, comment)) in columns.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.ident(ident).push(" ").column_type(sql_type);
            if !nullable {
                builder.push(" NOT NULL");
            }
            if let Some(comment) = comment {
                builder.push(" COMMENT ");
                builder.bind(SqlValue::Text((*comment).clone()), &SqlType::String);
            }
        }
        builder.push(")");

        if !partitions.is_empty() {
            builder.push(" PARTITIONED BY (").ident_list(&partitions).push(")");
        }
        if let Some(comment) = &request.comment {
            builder.push(" COMMENT ");
            builder.bind(SqlValue::Text(comment.clone()), &SqlType::String);
        }
        if let Some(location) = &request.location {
            if location.trim().is_empty() {
                return Err(GatewayError::validation("location must not be empty when provided"));
            }
            builder.push(" LOCATION ");
            builder.bind(SqlValue::Text(location.trim().to_string()), &SqlType::String);
        }

        Ok(finish(builder))
    }

    /// Only tables present in the current snapshot can be dropped.
    pub fn compile_drop(&self, snapshot: &CatalogSnapshot, request: &DropTableRequest) -> Result<Statement> {
        let table = snapshot.require(&request.table_name)?;
        let mut builder = StatementBuilder::new(StatementKind::DropTable, QualifiedName::of(&table));
        builder.push("DROP TABLE ").table();
        Ok(finish(builder))
    }

    fn resolve_limit(&self, requested: Option<u64>) -> Result<u64> {
        let limit = requested.unwrap_or(self.limits.default_row_limit);
        if limit == 0 || limit > self.limits.max_row_limit {
            return Err(GatewayError::validation(format!(
                "limit must be between 1 and {}",
                self.limits.max_row_limit
            )));
        }
        Ok(limit)
    }
}

fn finish(builder: StatementBuilder) -> Statement {
    let statement = builder.build();
    debug!(
        kind = ?statement.kind(),
        table = statement.target(),
        params = statement.params().len(),
        "compiled statement: {}",
        statement.sql()
    );
    statement
}

fn resolve_column<'t>(table: &'t TableDescriptor, name: &str) -> Result<&'t ColumnDescriptor> {
    table.column(name).ok_or_else(|| unknown_column(table, name))
}

fn unknown_column(table: &TableDescriptor, name: &str) -> GatewayError {
    match table.suggest_column(name) {
        Some(suggestion) => GatewayError::validation(format!(
            "unknown column '{}' in table {} (did you mean '{}'?)",
            name,
            table.full_name(),
            suggestion
        )),
        None => GatewayError::validation(format!("unknown column '{}' in table {}", name, table.full_name())),
    }
}

fn duplicate_column(name: &str) -> GatewayError {
    GatewayError::validation(format!("column '{}' is specified more than once", name))
}

fn unsupported_operator(name: &str) -> GatewayError {
    GatewayError::validation(format!(
        "unsupported filter on column '{}': only equality with a scalar value is supported",
        name
    ))
}

fn in_row(index: usize, err: GatewayError) -> GatewayError {
    GatewayError::validation(format!("row {}: {}", index, err.message()))
}

fn equality_predicates(table: &TableDescriptor, filter: &FilterSpec) -> Result<Vec<Predicate>> {
    let mut seen = HashSet::new();
    let mut predicates = Vec::with_capacity(filter.len());
    for (name, value) in filter.iter() {
        let column = resolve_column(table, name)?;
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(duplicate_column(name));
        }
        let value = match value {
            Value::Null => None,
            Value::Array(_) | Value::Object(_) => return Err(unsupported_operator(name)),
            scalar => Some(SqlValue::coerce(column, scalar)?),
        };
        predicates.push(Predicate {
            column: Ident::trusted(&column.name),
            sql_type: column.sql_type.clone(),
            value,
        });
    }
    Ok(predicates)
}

fn write_where(builder: &mut StatementBuilder, predicates: Vec<Predicate>) {
    for (i, predicate) in predicates.into_iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        builder.ident(&predicate.column);
        match predicate.value {
            Some(value) => {
                builder.push(" = ");
                builder.bind(value, &predicate.sql_type);
            }
            None => {
                builder.push(" IS NULL");
            }
        }
    }
}
