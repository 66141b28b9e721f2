//! Catalog Directory
//!
//! Holds the tables found by the most recent completed discovery cycle.
//! Readers take an `Arc` to an immutable snapshot; the discovery task swaps in
//! a whole new snapshot. A reader therefore sees either the old mapping or the
//! new one, never a mix.

use crate::catalog::descriptor::TableDescriptor;
use crate::catalog::namespaces::ReservedNamespaces;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Immutable view of the directory at one generation.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    tables: BTreeMap<String, Arc<TableDescriptor>>,
    generation: u64,
    refreshed_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Case-insensitive lookup by fully-qualified name.
    pub fn get(&self, full_name: &str) -> Option<&Arc<TableDescriptor>> {
        self.tables.get(&full_name.trim().to_ascii_lowercase())
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.get(full_name).is_some()
    }

    /// Lookup that fails with a validation error for unknown tables.
    pub fn require(&self, full_name: &str) -> Result<Arc<TableDescriptor>> {
        self.get(full_name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTable(full_name.trim().to_string()))
    }

    /// Tables in key order.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableDescriptor>> {
        self.tables.values()
    }

    /// Tables outside the reserved namespaces, in key order.
    pub fn visible_tables<'a>(
        &'a self,
        reserved: &'a ReservedNamespaces,
    ) -> impl Iterator<Item = &'a Arc<TableDescriptor>> + 'a {
        self.tables.values().filter(move |t| !reserved.excludes(&t.catalog, &t.schema))
    }
}

/// Shared handle to the current snapshot. Cloning shares the same directory.
#[derive(Debug, Clone, Default)]
pub struct CatalogDirectory {
    current: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl CatalogDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Swap in a complete new mapping. Duplicate keys keep the last descriptor.
    /// Returns the new generation.
    pub fn replace<I>(&self, tables: I) -> u64
    where
        I: IntoIterator<Item = TableDescriptor>,
    {
        let tables: BTreeMap<String, Arc<TableDescriptor>> =
            tables.into_iter().map(|t| (t.key(), Arc::new(t))).collect();

        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = guard.generation + 1;
        *guard = Arc::new(CatalogSnapshot {
            tables,
            generation,
            refreshed_at: Some(Utc::now()),
        });
        generation
    }
}
