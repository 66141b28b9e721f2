//! Table and column descriptors held by the catalog directory.

use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref DECIMAL_TYPE: Regex =
        Regex::new(r"(?i)^(?:DECIMAL|DEC|NUMERIC)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?$").unwrap();
}

/// Column types the gateway understands.
///
/// `Other` carries complex or vendor-specific types found during discovery
/// (ARRAY, MAP, STRUCT, ...). Such columns can be read and bound as text but
/// are never accepted in a create-table request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SqlType {
    String,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    Date,
    Timestamp,
    Binary,
    Other(String),
}

impl SqlType {
    /// Parse a type token from a request. Unsupported tokens are a validation error.
    pub fn parse(token: &str) -> Result<Self> {
        let trimmed = token.trim();
        let upper = trimmed.to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "STRING" | "VARCHAR" | "CHAR" | "TEXT" => SqlType::String,
            "TINYINT" | "BYTE" => SqlType::TinyInt,
            "SMALLINT" | "SHORT" => SqlType::SmallInt,
            "INT" | "INTEGER" => SqlType::Int,
            "BIGINT" | "LONG" => SqlType::BigInt,
            "FLOAT" | "REAL" => SqlType::Float,
            "DOUBLE" => SqlType::Double,
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "DATE" => SqlType::Date,
            "TIMESTAMP" | "TIMESTAMP_LTZ" => SqlType::Timestamp,
            "BINARY" => SqlType::Binary,
            _ => return Self::parse_decimal(trimmed),
        };
        Ok(parsed)
    }

    /// Map a remote catalog type name. Anything unrecognised is kept verbatim.
    pub fn from_remote(type_text: &str) -> Self {
        Self::parse(type_text).unwrap_or_else(|_| SqlType::Other(type_text.trim().to_string()))
    }

    fn parse_decimal(token: &str) -> Result<Self> {
        let caps = DECIMAL_TYPE
            .captures(token)
            .ok_or_else(|| GatewayError::validation(format!("unsupported column type '{}'", token)))?;

        let precision = match caps.get(1) {
            Some(p) => p.as_str().parse::<u8>().ok(),
            None => Some(10),
        };
        let scale = match caps.get(2) {
            Some(s) => s.as_str().parse::<u8>().ok(),
            None => Some(0),
        };

        match (precision, scale) {
            (Some(precision), Some(scale)) if (1..=38).contains(&precision) && scale <= precision => {
                Ok(SqlType::Decimal { precision, scale })
            }
            _ => Err(GatewayError::validation(format!(
                "invalid DECIMAL precision/scale in '{}' (precision 1-38, scale <= precision)",
                token
            ))),
        }
    }

    pub fn is_supported_for_create(&self) -> bool {
        !matches!(self, SqlType::Other(_))
    }

    /// Type name sent alongside a bound parameter.
    pub fn parameter_type(&self) -> String {
        match self {
            SqlType::Other(_) => "STRING".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::String => write!(f, "STRING"),
            SqlType::TinyInt => write!(f, "TINYINT"),
            SqlType::SmallInt => write!(f, "SMALLINT"),
            SqlType::Int => write!(f, "INT"),
            SqlType::BigInt => write!(f, "BIGINT"),
            SqlType::Float => write!(f, "FLOAT"),
            SqlType::Double => write!(f, "DOUBLE"),
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({},{})", precision, scale),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Date => write!(f, "DATE"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
            SqlType::Binary => write!(f, "BINARY"),
            SqlType::Other(text) => write!(f, "{}", text),
        }
    }
}

impl From<SqlType> for String {
    fn from(value: SqlType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for SqlType {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self> {
        Ok(SqlType::from_remote(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
            comment: None,
        }
    }
}

/// A discovered table. Immutable once built; the directory replaces whole
/// descriptors on every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub catalog: String,
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableDescriptor {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            name: name.into(),
            columns,
            discovered_at,
            comment: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.name)
    }

    /// Directory key: lowercased fully-qualified name.
    pub fn key(&self) -> String {
        self.full_name().to_ascii_lowercase()
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.nullable)
    }

    /// Closest known column name for an unknown one, if any is similar enough.
    pub fn suggest_column(&self, unknown: &str) -> Option<&str> {
        let needle = unknown.to_ascii_lowercase();
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), strsim::jaro_winkler(&needle, &c.name.to_ascii_lowercase())))
            .filter(|(_, score)| *score >= 0.85)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableDescriptor {
        TableDescriptor::new(
            "Main",
            "Sales",
            "Orders",
            vec![
                ColumnDescriptor::new("id", SqlType::String, false),
                ColumnDescriptor::new("amount", SqlType::Double, true),
            ],
            Utc::now(),
        )
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(SqlType::parse("long").unwrap(), SqlType::BigInt);
        assert_eq!(SqlType::parse("Integer").unwrap(), SqlType::Int);
        assert_eq!(SqlType::parse(" string ").unwrap(), SqlType::String);
    }

    #[test]
    fn test_parse_decimal_forms() {
        assert_eq!(
            SqlType::parse("decimal(12, 2)").unwrap(),
            SqlType::Decimal { precision: 12, scale: 2 }
        );
        assert_eq!(
            SqlType::parse("DECIMAL").unwrap(),
            SqlType::Decimal { precision: 10, scale: 0 }
        );
        assert!(SqlType::parse("DECIMAL(40,2)").is_err());
        assert!(SqlType::parse("DECIMAL(5,6)").is_err());
    }

    #[test]
    fn test_unsupported_token_rejected() {
        let err = SqlType::parse("VARCHAR2(20); DROP").unwrap_err();
        assert!(err.to_string().contains("unsupported column type"));
    }

    #[test]
    fn test_remote_complex_type_kept_as_other() {
        let ty = SqlType::from_remote("ARRAY<INT>");
        assert_eq!(ty, SqlType::Other("ARRAY<INT>".to_string()));
        assert!(!ty.is_supported_for_create());
        assert_eq!(ty.parameter_type(), "STRING");
    }

    #[test]
    fn test_key_is_lowercase_and_lookup_case_insensitive() {
        let table = sample_table();
        assert_eq!(table.full_name(), "Main.Sales.Orders");
        assert_eq!(table.key(), "main.sales.orders");
        assert_eq!(table.column("ID").map(|c| c.name.as_str()), Some("id"));
        assert_eq!(table.column_position("Amount"), Some(1));
    }

    #[test]
    fn test_suggest_column() {
        let table = sample_table();
        assert_eq!(table.suggest_column("amout"), Some("amount"));
        assert_eq!(table.suggest_column("zzz"), None);
    }
}
