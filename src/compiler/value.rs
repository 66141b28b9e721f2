//! Typed values bound to statement parameters.

use crate::catalog::descriptor::{ColumnDescriptor, SqlType};
use crate::error::{GatewayError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref DECIMAL_LITERAL: Regex = Regex::new(r"^[+-]?\d+(\.\d+)?$").unwrap();
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Decimal, date, timestamp and string values travel as text.
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text form sent to the remote engine; `None` for NULL.
    pub fn to_parameter_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Double(d) => Some(d.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Double(d) => serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Coerce a JSON value to the column's type, enforcing nullability.
    pub fn coerce(column: &ColumnDescriptor, value: &Value) -> Result<Self> {
        match value {
            Value::Null if column.nullable => Ok(SqlValue::Null),
            Value::Null => Err(GatewayError::validation(format!(
                "column '{}' is not nullable",
                column.name
            ))),
            Value::Array(_) | Value::Object(_) => Err(GatewayError::validation(format!(
                "column '{}' expects a scalar {} value",
                column.name, column.sql_type
            ))),
            scalar => coerce_scalar(column, scalar),
        }
    }
}

fn coerce_scalar(column: &ColumnDescriptor, value: &Value) -> Result<SqlValue> {
    let mismatch = || {
        GatewayError::validation(format!(
            "column '{}' expects {} but got {}",
            column.name, column.sql_type, value
        ))
    };

    match &column.sql_type {
        // Statement parameters carry text only; there is no agreed byte encoding.
        SqlType::Binary => Err(GatewayError::validation(format!(
            "column '{}' is BINARY; only null can be written or matched",
            column.name
        ))),
        SqlType::String | SqlType::Other(_) => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            _ => Err(mismatch()),
        },
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Int | SqlType::BigInt => {
            let parsed = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(mismatch)?;
            let (min, max) = integer_range(&column.sql_type);
            if parsed < min || parsed > max {
                return Err(GatewayError::validation(format!(
                    "value {} is out of range for column '{}' ({})",
                    parsed, column.name, column.sql_type
                )));
            }
            Ok(SqlValue::Int(parsed))
        }
        SqlType::Float | SqlType::Double => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .ok_or_else(mismatch)?;
            Ok(SqlValue::Double(parsed))
        }
        SqlType::Decimal { .. } => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.trim().to_string(),
                _ => return Err(mismatch()),
            };
            if DECIMAL_LITERAL.is_match(&text) {
                Ok(SqlValue::Text(text))
            } else {
                Err(mismatch())
            }
        }
        SqlType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(SqlValue::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(SqlValue::Bool(false)),
            _ => Err(mismatch()),
        },
        SqlType::Date => match value {
            Value::String(s) if NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok() => {
                Ok(SqlValue::Text(s.trim().to_string()))
            }
            _ => Err(mismatch()),
        },
        SqlType::Timestamp => match value {
            Value::String(s) if is_timestamp(s.trim()) => Ok(SqlValue::Text(s.trim().to_string())),
            _ => Err(mismatch()),
        },
    }
}

fn integer_range(sql_type: &SqlType) -> (i64, i64) {
    match sql_type {
        SqlType::TinyInt => (i8::MIN as i64, i8::MAX as i64),
        SqlType::SmallInt => (i16::MIN as i64, i16::MAX as i64),
        SqlType::Int => (i32::MIN as i64, i32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

fn is_timestamp(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || TIMESTAMP_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(text, fmt).is_ok())
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}
