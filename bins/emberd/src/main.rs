//! emberd, the Embermine daemon.
//!
//! Opens the SQLite ledger, starts the block-production scheduler, and runs
//! until SIGINT. With `--reconcile`, performs a single hashrate
//! reconciliation pass and exits (the admin drift-correction entry point).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ember_core::traits::LedgerStore;
use ember_engine::{EngineConfig, HealthMonitor, Scheduler, SqliteStore};

/// CLI arguments for the daemon.
#[derive(Debug, Parser)]
#[command(name = "emberd")]
#[command(about = "Embermine block production daemon", long_about = None)]
struct Args {
    /// Path to the SQLite ledger (overrides EMBER_DB_PATH).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Run one hashrate reconciliation pass and exit.
    #[arg(long)]
    reconcile: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Log the health report periodically so operators can watch degradation
/// without an HTTP probe. Emitted as JSON so log tooling can parse it.
async fn health_logger(scheduler: Scheduler<SqliteStore>) {
    loop {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let report = scheduler.health();
        match serde_json::to_string(&report) {
            Ok(body) => info!(report = %body, "engine health"),
            Err(e) => warn!(error = %e, "failed to serialize health report"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("emberd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = EngineConfig::from_env().context("failed to load engine configuration")?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    info!(
        db = %config.db_path.display(),
        interval_secs = config.cycle_interval.as_secs(),
        timeout_secs = config.cycle_timeout.as_secs(),
        block_reward = config.block_reward,
        "configuration loaded"
    );

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?,
    );

    if args.reconcile {
        let corrected = store
            .reconcile_hashrate()
            .context("hashrate reconciliation failed")?;
        info!(corrected, "reconciliation pass complete");
        return Ok(());
    }

    let health = Arc::new(HealthMonitor::new(config.alert_threshold));
    let scheduler = Scheduler::new(store, health, config);
    scheduler
        .start()
        .context("failed to start block scheduler")?;

    tokio::spawn(health_logger(scheduler.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for SIGINT")?;
    warn!("received SIGINT, shutting down...");
    scheduler.stop();

    info!("emberd shutdown complete");
    Ok(())
}
