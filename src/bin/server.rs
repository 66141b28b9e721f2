//! Supabricks HTTP server.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use supabricks::auth::DatabricksIdentityVerifier;
use supabricks::catalog::{CatalogDirectory, DiscoveryService};
use supabricks::compiler::StatementCompiler;
use supabricks::config::GatewayConfig;
use supabricks::execution::{DatabricksEngine, ExecutionGateway};
use supabricks::observability::GatewayMetrics;
use supabricks::server::{self, AppState};
use supabricks::service::TableService;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "supabricks")]
#[command(about = "REST gateway for lakehouse tables")]
#[command(version)]
struct Args {
    /// Address to listen on (overrides SUPABRICKS_BIND_ADDR)
    #[arg(short, long)]
    bind: Option<String>,

    /// Seconds between catalog discovery cycles (overrides SUPABRICKS_DISCOVERY_INTERVAL_SECS)
    #[arg(long)]
    discovery_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = GatewayConfig::from_env().context("invalid configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(secs) = args.discovery_interval {
        config.discovery_interval = Duration::from_secs(secs);
    }
    config.validate().context("invalid configuration")?;

    info!("Supabricks {} starting", env!("CARGO_PKG_VERSION"));
    info!("Workspace: {} (warehouse {})", config.host, config.warehouse_id);

    let metrics = Arc::new(GatewayMetrics::new());
    let engine = Arc::new(DatabricksEngine::from_config(&config)?);
    let directory = CatalogDirectory::new();

    let discovery = DiscoveryService::new(engine.clone(), directory.clone(), config.reserved.clone(), metrics.clone())
        .with_interval(config.discovery_interval)
        .with_timeout(config.discovery_timeout)
        .spawn();

    let verifier = Arc::new(DatabricksIdentityVerifier::new(&config.host, Duration::from_secs(30))?);
    let gateway = ExecutionGateway::new(engine, config.retry_policy(), metrics.clone());
    let compiler = StatementCompiler::new(config.compiler_limits(), config.reserved.clone());
    let service = TableService::new(directory, compiler, gateway, verifier, config.statement_timeout);
    let state = Arc::new(AppState::new(service, metrics));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Server listening on {}", config.bind_addr);

    server::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    discovery.shutdown().await;
    info!("Supabricks stopped");
    Ok(())
}
