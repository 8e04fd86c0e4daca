//! memberlink binary entry point.
//!
//! Usage:
//! ```bash
//! memberlink --config memberlink.toml
//! ```

use anyhow::{Context, Result};
use memberlink_engine::{
    spawn_reconcile_task, ApplyOptions, Config, ReconcileSchedule, Reconciler, SqliteStore,
    TracingSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(fmt::layer())
        .init();

    tracing::info!(
        "memberlink v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let store = SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;

    let options = ApplyOptions {
        actor: config.reconcile.principal()?,
        failure_policy: config.reconcile.failure_policy,
    };
    let engine = Arc::new(Reconciler::new(store.clone(), store, TracingSink, options));
    let schedule = ReconcileSchedule::from_config(Arc::clone(&engine), &config.reconcile)?;

    let task = spawn_reconcile_task(schedule, config.reconcile.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    task.abort();
    tracing::debug!("{}", engine.metrics().render_prometheus());

    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("memberlink.toml"))
}
