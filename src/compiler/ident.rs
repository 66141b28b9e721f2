//! SQL identifiers.
//!
//! An `Ident` is the only runtime text the statement builder will splice into
//! SQL. It is either copied from a discovered descriptor or validated against
//! a strict grammar, and it is always rendered backtick-quoted.

use crate::catalog::descriptor::TableDescriptor;
use crate::error::{GatewayError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub const MAX_IDENTIFIER_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate a caller-supplied name.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(GatewayError::validation("identifier must not be empty"));
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(GatewayError::validation(format!(
                "identifier '{}...' exceeds {} characters",
                &raw[..raw.char_indices().nth(32).map(|(i, _)| i).unwrap_or(raw.len())],
                MAX_IDENTIFIER_LEN
            )));
        }
        if !IDENTIFIER.is_match(raw) {
            return Err(GatewayError::validation(format!(
                "invalid identifier '{}': use letters, digits and underscores, not starting with a digit",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Name taken from the catalog directory or generated by the compiler.
    pub(crate) fn trusted(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        format!("`{}`", self.0.replace('`', "``"))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Three-part `catalog.schema.table` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub catalog: Ident,
    pub schema: Ident,
    pub table: Ident,
}

impl QualifiedName {
    /// Parse and validate a caller-supplied three-part name.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(GatewayError::validation(format!(
                "table name '{}' must have the form catalog.schema.table",
                name
            )));
        }
        Ok(Self {
            catalog: Ident::parse(parts[0])?,
            schema: Ident::parse(parts[1])?,
            table: Ident::parse(parts[2])?,
        })
    }

    pub fn of(table: &TableDescriptor) -> Self {
        Self {
            catalog: Ident::trusted(&table.catalog),
            schema: Ident::trusted(&table.schema),
            table: Ident::trusted(&table.name),
        }
    }

    pub fn quoted(&self) -> String {
        format!("{}.{}.{}", self.catalog.quoted(), self.schema.quoted(), self.table.quoted())
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}
