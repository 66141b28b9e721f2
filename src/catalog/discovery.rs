//! Catalog Discovery Service
//!
//! Periodically lists the remote catalog and swaps a fresh snapshot into the
//! directory. A failed cycle leaves the previous snapshot in place and is
//! retried on the next tick.

use crate::catalog::descriptor::{ColumnDescriptor, SqlType, TableDescriptor};
use crate::catalog::directory::CatalogDirectory;
use crate::catalog::namespaces::ReservedNamespaces;
use crate::error::{GatewayError, Result};
use crate::execution::engine::{CatalogSource, RemoteTable};
use crate::observability::GatewayMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub generation: u64,
    pub tables: usize,
    pub skipped_reserved: usize,
    pub skipped_views: usize,
    pub elapsed_ms: u64,
}

pub struct DiscoveryService {
    source: Arc<dyn CatalogSource>,
    directory: CatalogDirectory,
    reserved: ReservedNamespaces,
    interval: Duration,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl DiscoveryService {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        directory: CatalogDirectory,
        reserved: ReservedNamespaces,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            source,
            directory,
            reserved,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            metrics,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one discovery cycle now.
    pub async fn run_cycle(&self) -> Result<DiscoveryReport> {
        let started = Instant::now();
        match self.try_cycle(started).await {
            Ok(report) => {
                self.metrics.record_discovery_success();
                info!(
                    generation = report.generation,
                    tables = report.tables,
                    skipped_reserved = report.skipped_reserved,
                    skipped_views = report.skipped_views,
                    "catalog discovery completed in {}ms",
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(err) => {
                self.metrics.record_discovery_failure();
                let current = self.directory.snapshot();
                warn!(
                    generation = current.generation(),
                    tables = current.len(),
                    "catalog discovery failed, keeping previous snapshot: {}",
                    err.message()
                );
                Err(err)
            }
        }
    }

    async fn try_cycle(&self, started: Instant) -> Result<DiscoveryReport> {
        let remote = tokio::time::timeout(self.timeout, self.source.list_remote_tables())
            .await
            .map_err(|_| {
                GatewayError::DiscoveryCycle(format!(
                    "catalog listing timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| GatewayError::DiscoveryCycle(e.to_string()))?;

        let built = build_descriptors(remote, &self.reserved, Utc::now())?;
        let tables = built.tables.len();
        let generation = self.directory.replace(built.tables);

        Ok(DiscoveryReport {
            generation,
            tables,
            skipped_reserved: built.skipped_reserved,
            skipped_views: built.skipped_views,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Start the periodic task. The first cycle runs immediately.
    pub fn spawn(self) -> DiscoveryHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!("catalog discovery started, interval {}s", self.interval.as_secs());
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Failures are logged and counted inside run_cycle.
                        let _ = self.run_cycle().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("catalog discovery stopped");
        });
        DiscoveryHandle { shutdown, task }
    }
}

pub struct DiscoveryHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Stop the task and wait for an in-flight cycle to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("discovery task ended abnormally: {}", e);
        }
    }
}

struct BuiltCatalog {
    tables: Vec<TableDescriptor>,
    skipped_reserved: usize,
    skipped_views: usize,
}

fn build_descriptors(
    remote: Vec<RemoteTable>,
    reserved: &ReservedNamespaces,
    discovered_at: DateTime<Utc>,
) -> Result<BuiltCatalog> {
    let mut built = BuiltCatalog {
        tables: Vec::with_capacity(remote.len()),
        skipped_reserved: 0,
        skipped_views: 0,
    };

    for table in remote {
        if reserved.excludes(&table.catalog, &table.schema) {
            built.skipped_reserved += 1;
            continue;
        }
        if table.is_view() {
            built.skipped_views += 1;
            continue;
        }

        let full_name = format!("{}.{}.{}", table.catalog, table.schema, table.name);
        let mut remote_columns = table.columns;
        remote_columns.sort_by_key(|c| c.ordinal);

        let mut columns = Vec::with_capacity(remote_columns.len());
        for column in remote_columns {
            let nullable = parse_nullable(&column.is_nullable).ok_or_else(|| {
                GatewayError::DiscoveryCycle(format!(
                    "malformed nullability '{}' for column {}.{}",
                    column.is_nullable, full_name, column.name
                ))
            })?;
            columns.push(ColumnDescriptor {
                sql_type: SqlType::from_remote(&column.data_type),
                name: column.name,
                nullable,
                comment: column.comment,
            });
        }

        debug!(table = %full_name, columns = columns.len(), "discovered table");
        let mut descriptor = TableDescriptor::new(table.catalog, table.schema, table.name, columns, discovered_at);
        descriptor.comment = table.comment;
        built.tables.push(descriptor);
    }
    Ok(built)
}

fn parse_nullable(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "YES" | "TRUE" => Some(true),
        "NO" | "FALSE" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::{RemoteColumn, RemoteError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticSource {
        result: Mutex<std::result::Result<Vec<RemoteTable>, RemoteError>>,
    }

    #[async_trait]
    impl CatalogSource for StaticSource {
        async fn list_remote_tables(&self) -> std::result::Result<Vec<RemoteTable>, RemoteError> {
            self.result.lock().unwrap().clone()
        }
    }

    fn column(name: &str, ordinal: u32, data_type: &str, nullable: &str) -> RemoteColumn {
        RemoteColumn {
            name: name.to_string(),
            ordinal,
            data_type: data_type.to_string(),
            is_nullable: nullable.to_string(),
            comment: None,
        }
    }

    fn remote(catalog: &str, schema: &str, name: &str, table_type: &str) -> RemoteTable {
        RemoteTable {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
            table_type: table_type.to_string(),
            comment: None,
            columns: vec![column("value", 2, "int", "YES"), column("id", 1, "string", "NO")],
        }
    }

    fn service(result: std::result::Result<Vec<RemoteTable>, RemoteError>) -> (DiscoveryService, Arc<StaticSource>) {
        let source = Arc::new(StaticSource {
            result: Mutex::new(result),
        });
        let service = DiscoveryService::new(
            source.clone(),
            CatalogDirectory::new(),
            ReservedNamespaces::default(),
            Arc::new(GatewayMetrics::new()),
        );
        (service, source)
    }

    #[tokio::test]
    async fn test_cycle_filters_reserved_and_views() {
        let (service, _) = service(Ok(vec![
            remote("c", "s", "t", "MANAGED"),
            remote("system", "access", "audit", "MANAGED"),
            remote("c", "information_schema", "tables", "MANAGED"),
            remote("c", "s", "v", "VIEW"),
        ]));
        let report = service.run_cycle().await.unwrap();
        assert_eq!(report.tables, 1);
        assert_eq!(report.skipped_reserved, 2);
        assert_eq!(report.skipped_views, 1);

        let snapshot = service.directory.snapshot();
        let table = snapshot.get("c.s.t").unwrap();
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "value"]);
        assert!(!table.columns[0].nullable);
        assert_eq!(table.columns[1].sql_type, SqlType::Int);
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let (service, source) = service(Ok(vec![remote("c", "s", "t", "MANAGED")]));
        service.run_cycle().await.unwrap();
        let before = service.directory.snapshot();

        *source.result.lock().unwrap() = Err(RemoteError::Transient("connection reset".to_string()));
        let err = service.run_cycle().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DiscoveryCycleFailure);

        let after = service.directory.snapshot();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.generation(), 1);
        assert_eq!(service.metrics.discovery_failures(), 1);
    }

    #[tokio::test]
    async fn test_malformed_nullability_abandons_cycle() {
        let mut table = remote("c", "s", "t", "MANAGED");
        table.columns[0].is_nullable = "maybe".to_string();
        let (service, _) = service(Ok(vec![table]));
        assert!(service.run_cycle().await.is_err());
        assert_eq!(service.directory.snapshot().generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_runs_first_cycle_and_stops() {
        let (service, _) = service(Ok(vec![remote("c", "s", "t", "MANAGED")]));
        let directory = service.directory.clone();
        let handle = service.with_interval(Duration::from_secs(60)).spawn();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(directory.snapshot().generation(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(directory.snapshot().generation(), 2);

        handle.shutdown().await;
    }
}
