//! Execution Gateway
//!
//! Submits compiled statements to the remote engine with a per-attempt
//! timeout and bounded retry of transient failures.
//!
//! Per statement: `Pending -> Submitted -> {Succeeded, FailedTransient, FailedFatal}`.
//! `FailedTransient` loops back to `Submitted` until the retry bound is
//! reached, then ends in `FailedFatal`.

use crate::compiler::Statement;
use crate::error::{GatewayError, Result};
use crate::execution::classifier::ErrorClassifier;
use crate::execution::engine::{ExecutionContext, RemoteEngine, RemoteError, RemoteRows};
use crate::execution::retry::RetryPolicy;
use crate::observability::GatewayMetrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementState {
    Pending,
    Submitted,
    Succeeded,
    FailedTransient,
    FailedFatal,
}

impl StatementState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatementState::Succeeded | StatementState::FailedFatal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTrace {
    pub request_id: Uuid,
    pub target: String,
    pub attempts: usize,
    pub transitions: Vec<StatementState>,
    pub elapsed_ms: u64,
}

impl ExecutionTrace {
    fn start(ctx: &ExecutionContext, statement: &Statement) -> Self {
        Self {
            request_id: ctx.request_id,
            target: statement.target().to_string(),
            attempts: 0,
            transitions: vec![StatementState::Pending],
            elapsed_ms: 0,
        }
    }

    fn advance(&mut self, state: StatementState) {
        debug!(
            request_id = %self.request_id,
            table = %self.target,
            attempt = self.attempts,
            "statement {:?} -> {:?}",
            self.final_state(),
            state
        );
        self.transitions.push(state);
    }

    pub fn final_state(&self) -> StatementState {
        self.transitions.last().copied().unwrap_or(StatementState::Pending)
    }
}

/// Successful execution with its trace.
#[derive(Debug, Clone)]
pub struct Execution {
    pub rows: RemoteRows,
    pub trace: ExecutionTrace,
}

pub struct ExecutionGateway {
    engine: Arc<dyn RemoteEngine>,
    policy: RetryPolicy,
    metrics: Arc<GatewayMetrics>,
}

impl ExecutionGateway {
    pub fn new(engine: Arc<dyn RemoteEngine>, policy: RetryPolicy, metrics: Arc<GatewayMetrics>) -> Self {
        Self { engine, policy, metrics }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(&self, ctx: &ExecutionContext, statement: &Statement) -> Result<Execution> {
        let (trace, outcome) = self.execute_traced(ctx, statement).await;
        outcome.map(|rows| Execution { rows, trace })
    }

    /// Like `execute`, but the trace is returned on failure too.
    pub async fn execute_traced(
        &self,
        ctx: &ExecutionContext,
        statement: &Statement,
    ) -> (ExecutionTrace, Result<RemoteRows>) {
        let started = Instant::now();
        let mut trace = ExecutionTrace::start(ctx, statement);
        let outcome = self.run(ctx, statement, &mut trace).await;
        trace.elapsed_ms = started.elapsed().as_millis() as u64;

        let kind = format!("{:?}", statement.kind());
        match &outcome {
            Ok(_) => self.metrics.record_statement(&kind, trace.elapsed_ms),
            Err(err) => self.metrics.record_error(err.kind()),
        }
        (trace, outcome)
    }

    async fn run(&self, ctx: &ExecutionContext, statement: &Statement, trace: &mut ExecutionTrace) -> Result<RemoteRows> {
        let mut last_transient = String::new();

        for attempt in 0..self.policy.max_attempts() {
            trace.attempts += 1;
            trace.advance(StatementState::Submitted);

            let outcome = match tokio::time::timeout(ctx.timeout, self.engine.execute(ctx, statement)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RemoteError::Transient(format!(
                    "statement timed out after {}s",
                    ctx.timeout.as_secs_f64()
                ))),
            };

            match outcome {
                Ok(rows) => {
                    trace.advance(StatementState::Succeeded);
                    return Ok(rows);
                }
                Err(RemoteError::Transient(message)) => {
                    trace.advance(StatementState::FailedTransient);
                    warn!(
                        request_id = %ctx.request_id,
                        engine = self.engine.name(),
                        table = statement.target(),
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts(),
                        "transient failure: {}",
                        message
                    );
                    last_transient = message;
                    if attempt < self.policy.max_retries {
                        self.metrics.record_retry();
                        tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                    }
                }
                Err(fatal) => {
                    trace.advance(StatementState::FailedFatal);
                    if ErrorClassifier::is_malformed_statement(&fatal) {
                        error!(
                            request_id = %ctx.request_id,
                            kind = ?statement.kind(),
                            sql = statement.sql(),
                            "remote engine rejected a compiled statement as malformed: {}",
                            fatal.message()
                        );
                    } else {
                        debug!(request_id = %ctx.request_id, "remote failure: {}", fatal);
                    }
                    return Err(fatal.into());
                }
            }
        }

        trace.advance(StatementState::FailedFatal);
        Err(GatewayError::RemoteUnavailable {
            attempts: trace.attempts,
            message: last_transient,
        })
    }
}
