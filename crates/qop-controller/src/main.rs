//! Quantum job operator entry point.
//!
//! Assembles the reconciliation engine around a record store, starts the
//! controller loop, and shuts it down gracefully on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use qop_engine::{
    BackendSelector, Config, Controller, Reconciler, ValidationClient,
};
use qop_store::MemoryStore;

mod tracing_config;

/// Control plane for declarative quantum-circuit jobs.
#[derive(Parser)]
#[command(name = "qop-controller")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the validation service URL.
    #[arg(long)]
    validation_url: Option<String>,

    /// Override the number of reconcile workers.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.validation_url {
        config.engine.validation_url = url;
    }
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }
    config.validate()?;

    tracing_config::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    tracing::info!(
        validation_url = %config.engine.validation_url,
        workers = config.engine.workers,
        "starting quantum job operator"
    );

    let store = Arc::new(MemoryStore::new());
    let validator = Arc::new(ValidationClient::new(
        config.engine.validation_url.clone(),
        Duration::from_secs(10),
    )?);

    if !validator.health().await.unwrap_or(false) {
        tracing::warn!("validation service health probe failed, jobs will requeue until it is up");
    }

    let reconciler = Reconciler::new(
        store.clone(),
        validator,
        BackendSelector::with_local_simulator(),
        config.engine.clone(),
    );
    let controller = Controller::new(store, reconciler);
    let shutdown = controller.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    controller.run().await?;
    tracing::info!("operator stopped");
    Ok(())
}
