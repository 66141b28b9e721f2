//! Execution Module
//!
//! - `RemoteEngine` / `CatalogSource` traits for pluggable remote engines
//! - `ExecutionGateway` for timeout, retry and state tracking
//! - `DatabricksEngine`, the SQL Statement Execution API implementation

pub mod classifier;
pub mod databricks;
pub mod engine;
pub mod gateway;
pub mod retry;

pub use classifier::ErrorClassifier;
pub use databricks::DatabricksEngine;
pub use engine::{
    CatalogSource, ExecutionContext, RemoteColumn, RemoteEngine, RemoteError, RemoteRows, RemoteTable,
};
pub use gateway::{Execution, ExecutionGateway, ExecutionTrace, StatementState};
pub use retry::RetryPolicy;
