//! Process configuration read from the environment.

use crate::catalog::ReservedNamespaces;
use crate::compiler::CompilerLimits;
use crate::error::{GatewayError, Result};
use crate::execution::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Workspace URL, e.g. `https://adb-123.azuredatabricks.net`.
    pub host: String,
    /// Service token used for discovery only.
    pub service_token: String,
    pub warehouse_id: String,
    pub bind_addr: String,
    pub discovery_interval: Duration,
    pub discovery_timeout: Duration,
    pub reserved: ReservedNamespaces,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub statement_timeout: Duration,
    pub default_row_limit: u64,
    pub max_row_limit: u64,
    pub insert_batch_size: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| GatewayError::Config(format!("{} must be set", key)))
        };

        let mut host = required("DATABRICKS_HOST")?.trim_end_matches('/').to_string();
        if !host.starts_with("http://") && !host.starts_with("https://") {
            host = format!("https://{}", host);
        }

        let reserved = match lookup("SUPABRICKS_RESERVED_NAMESPACES") {
            Some(list) if !list.trim().is_empty() => ReservedNamespaces::parse_list(&list),
            _ => ReservedNamespaces::default(),
        };

        let config = Self {
            host,
            service_token: required("DATABRICKS_TOKEN")?,
            warehouse_id: required("DATABRICKS_WAREHOUSE_ID")?,
            bind_addr: lookup("SUPABRICKS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            discovery_interval: Duration::from_secs(parse_or(&lookup, "SUPABRICKS_DISCOVERY_INTERVAL_SECS", 60)?),
            discovery_timeout: Duration::from_secs(parse_or(&lookup, "SUPABRICKS_DISCOVERY_TIMEOUT_SECS", 120)?),
            reserved,
            max_retries: parse_or(&lookup, "SUPABRICKS_MAX_RETRIES", 2)?,
            retry_delay: Duration::from_millis(parse_or(&lookup, "SUPABRICKS_RETRY_DELAY_MS", 250)?),
            statement_timeout: Duration::from_secs(parse_or(&lookup, "SUPABRICKS_STATEMENT_TIMEOUT_SECS", 45)?),
            default_row_limit: parse_or(&lookup, "SUPABRICKS_DEFAULT_ROW_LIMIT", 100)?,
            max_row_limit: parse_or(&lookup, "SUPABRICKS_MAX_ROW_LIMIT", 10_000)?,
            insert_batch_size: parse_or(&lookup, "SUPABRICKS_INSERT_BATCH_SIZE", 500)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery_interval.is_zero() {
            return Err(GatewayError::Config("discovery interval must be at least 1 second".to_string()));
        }
        if self.discovery_timeout.is_zero() || self.statement_timeout.is_zero() {
            return Err(GatewayError::Config("timeouts must be at least 1 second".to_string()));
        }
        if self.max_row_limit == 0 || self.default_row_limit == 0 || self.default_row_limit > self.max_row_limit {
            return Err(GatewayError::Config(format!(
                "default row limit {} must be between 1 and the max row limit {}",
                self.default_row_limit, self.max_row_limit
            )));
        }
        if self.insert_batch_size == 0 {
            return Err(GatewayError::Config("insert batch size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn compiler_limits(&self) -> CompilerLimits {
        CompilerLimits {
            default_row_limit: self.default_row_limit,
            max_row_limit: self.max_row_limit,
            insert_batch_size: self.insert_batch_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, self.retry_delay)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Config(format!("{} has an invalid value '{}'", key, raw))),
        _ => Ok(default),
    }
}
