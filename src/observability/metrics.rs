//! Gateway Metrics
//!
//! Track discovery cycles, statement executions and errors by kind.

use crate::error::ErrorKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ExecutionTimes {
    count: u64,
    total_ms: u64,
}

#[derive(Debug, Default)]
pub struct GatewayMetrics {
    counters: Mutex<HashMap<&'static str, u64>>,
    error_counts: Mutex<HashMap<ErrorKind, u64>>,
    execution_times: Mutex<HashMap<String, ExecutionTimes>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub discovery_cycles: u64,
    pub discovery_failures: u64,
    pub statements_executed: u64,
    pub statement_retries: u64,
    pub errors: HashMap<String, u64>,
    pub avg_execution_ms: HashMap<String, f64>,
}

const DISCOVERY_CYCLES: &str = "discovery_cycles";
const DISCOVERY_FAILURES: &str = "discovery_failures";
const STATEMENTS: &str = "statements_executed";
const RETRIES: &str = "statement_retries";

// A panicking holder cannot leave a counter map half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, counter: &'static str) {
        *lock(&self.counters).entry(counter).or_insert(0) += 1;
    }

    fn counter(&self, counter: &'static str) -> u64 {
        lock(&self.counters).get(counter).copied().unwrap_or(0)
    }

    pub fn record_discovery_success(&self) {
        self.bump(DISCOVERY_CYCLES);
    }

    pub fn record_discovery_failure(&self) {
        self.bump(DISCOVERY_CYCLES);
        self.bump(DISCOVERY_FAILURES);
        self.record_error(ErrorKind::DiscoveryCycleFailure);
    }

    pub fn record_statement(&self, kind: &str, time_ms: u64) {
        self.bump(STATEMENTS);
        let mut times = lock(&self.execution_times);
        let entry = times.entry(kind.to_string()).or_default();
        entry.count += 1;
        entry.total_ms += time_ms;
    }

    pub fn record_retry(&self) {
        self.bump(RETRIES);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        *lock(&self.error_counts).entry(kind).or_insert(0) += 1;
    }

    pub fn discovery_failures(&self) -> u64 {
        self.counter(DISCOVERY_FAILURES)
    }

    pub fn statement_retries(&self) -> u64 {
        self.counter(RETRIES)
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        lock(&self.error_counts).get(&kind).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            discovery_cycles: self.counter(DISCOVERY_CYCLES),
            discovery_failures: self.counter(DISCOVERY_FAILURES),
            statements_executed: self.counter(STATEMENTS),
            statement_retries: self.counter(RETRIES),
            errors: lock(&self.error_counts)
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            avg_execution_ms: lock(&self.execution_times)
                .iter()
                .filter(|(_, t)| t.count > 0)
                .map(|(kind, t)| (kind.clone(), t.total_ms as f64 / t.count as f64))
                .collect(),
        }
    }
}
