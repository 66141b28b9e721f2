//! Parameterized statements and the builder that produces them.
//!
//! `StatementBuilder` is the only place SQL text is assembled. It accepts
//! three kinds of input: `&'static str` fragments written in this crate,
//! `Ident`s (always quoted), and values, which are never written into the
//! text and instead become named parameters.

use crate::catalog::descriptor::SqlType;
use crate::compiler::ident::{Ident, QualifiedName};
use crate::compiler::value::SqlValue;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Merge,
    Delete,
    CreateTable,
    DropTable,
}

impl StatementKind {
    /// True for statements that change data or schema.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, StatementKind::Select)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundParam {
    pub name: String,
    pub value: SqlValue,
    pub sql_type: SqlType,
}

/// Only `StatementBuilder` can construct a statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    kind: StatementKind,
    target: String,
    sql: String,
    params: Vec<BoundParam>,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Unquoted `catalog.schema.table` the statement operates on.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&BoundParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

pub struct StatementBuilder {
    kind: StatementKind,
    target: QualifiedName,
    sql: String,
    params: Vec<BoundParam>,
}

impl StatementBuilder {
    pub fn new(kind: StatementKind, target: QualifiedName) -> Self {
        Self {
            kind,
            target,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, fragment: &'static str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn ident(&mut self, ident: &Ident) -> &mut Self {
        self.sql.push_str(&ident.quoted());
        self
    }

    /// `alias.`column``
    pub fn qualified_ident(&mut self, alias: &'static str, ident: &Ident) -> &mut Self {
        self.sql.push_str(alias);
        self.sql.push('.');
        self.ident(ident)
    }

    pub fn table(&mut self) -> &mut Self {
        let quoted = self.target.quoted();
        self.sql.push_str(&quoted);
        self
    }

    /// Comma-separated quoted identifiers.
    pub fn ident_list<'a, I>(&mut self, idents: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Ident>,
    {
        for (i, ident) in idents.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.ident(ident);
        }
        self
    }

    /// Column type from the supported enum. `Other` types never reach here:
    /// create-table compilation rejects them first.
    pub fn column_type(&mut self, sql_type: &SqlType) -> &mut Self {
        debug_assert!(sql_type.is_supported_for_create());
        let _ = write!(self.sql, "{}", sql_type);
        self
    }

    /// Bind a value and write its marker. Returns the parameter name.
    pub fn bind(&mut self, value: SqlValue, sql_type: &SqlType) -> String {
        let name = format!("p{}", self.params.len());
        self.sql.push(':');
        self.sql.push_str(&name);
        self.params.push(BoundParam {
            name: name.clone(),
            value,
            sql_type: sql_type.clone(),
        });
        name
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        let _ = write!(self.sql, " LIMIT {}", limit);
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            kind: self.kind,
            target: self.target.to_string(),
            sql: self.sql,
            params: self.params,
        }
    }
}
