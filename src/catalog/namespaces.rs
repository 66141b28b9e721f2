//! Reserved (platform-internal) namespaces excluded from discovery and listings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_RESERVED: &[&str] = &["system", "sys*", "information_schema", "samples", "__databricks_internal"];

/// Catalog/schema names that are never exposed.
///
/// Entries ending in `*` match by prefix; everything else matches the whole
/// name. Matching is ASCII case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedNamespaces {
    names: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl ReservedNamespaces {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = BTreeSet::new();
        let mut prefixes = BTreeSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim().to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            match entry.strip_suffix('*') {
                Some(prefix) if !prefix.is_empty() => {
                    prefixes.insert(prefix.to_string());
                }
                Some(_) => {}
                None => {
                    names.insert(entry);
                }
            }
        }
        Self { names, prefixes }
    }

    /// Parse a comma-separated list, e.g. `system,information_schema,sys_*`.
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.names.contains(&lower) || self.prefixes.iter().any(|p| lower.starts_with(p.as_str()))
    }

    /// True when either the catalog or the schema is reserved.
    pub fn excludes(&self, catalog: &str, schema: &str) -> bool {
        self.is_reserved(catalog) || self.is_reserved(schema)
    }
}

impl Default for ReservedNamespaces {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVED.iter())
    }
}
