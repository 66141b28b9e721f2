//! Supabricks
//!
//! REST gateway over remote lakehouse tables. A background discovery task
//! keeps a catalog snapshot current; each request is verified, validated
//! against that snapshot, compiled to a parameterized statement and executed
//! on the remote SQL warehouse with the caller's own credentials.

pub mod auth;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod execution;
pub mod observability;
pub mod server;
pub mod service;

pub use auth::{IdentityVerifier, Principal};
pub use catalog::{CatalogDirectory, CatalogSnapshot, DiscoveryService, TableDescriptor};
pub use compiler::{Statement, StatementCompiler};
pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, Result};
pub use execution::{CatalogSource, ExecutionGateway, RemoteEngine};
pub use service::TableService;
