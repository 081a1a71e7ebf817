//! Laundry Desk backend core.
//!
//! Order lifecycle for a laundry shop: booking, the stage progression from
//! `pending` to `completed`, per-stage timers with timer-driven auto-advance,
//! payment records with mobile-wallet proof review, and the history archive.
//! Every component is built over an explicit [`db::DbState`] handle.

pub mod config;
pub mod customers;
mod data_helpers;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod history;
pub mod orders;
pub mod payments;
pub mod stages;
pub mod sweep;
pub mod timers;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::LaundryConfig;
pub use error::{OrderError, Result};
pub use history::{HistoryArchive, HistoryItem, HistoryKind};
pub use orders::{NewOrder, Order, OrderStore, OrderView};
pub use payments::{PaymentMethod, PaymentStatus, PaymentStore, ReviewStatus};
pub use stages::{Stage, AUTO_ADVANCE_PROGRESSION, FULL_PROGRESSION};
pub use timers::{TimerEngine, TimerStatus};

/// Install structured logging: console plus a daily rolling file in
/// `log_dir`. Keep the returned guard alive; dropping it flushes the file
/// writer.
pub fn init_logging(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,laundry_desk_lib=debug"));

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log dir {}", log_dir.display()))?;
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(guard)
}

// ============================================================================
// Entry point
// ============================================================================

/// Open the database and run the auto-advance sweep until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let mut config = LaundryConfig::from_env()?;
    let _guard = init_logging(&config.log_dir)?;

    info!("Starting Laundry Desk v{}", env!("CARGO_PKG_VERSION"));

    let db = Arc::new(db::init(&config.data_dir)?);
    {
        let conn = db.conn.lock().map_err(|_| OrderError::LockPoisoned)?;
        config.apply_settings(&conn);
    }

    let health = diagnostics::health_snapshot(&db)?;
    info!(
        schema_version = health.schema_version,
        active_orders = health.active_orders,
        running_timers = health.running_timers,
        "Database ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let sweep = sweep::start_sweep_loop(
            Arc::clone(&db),
            config.sweep_interval_secs,
            config.expiry_threshold_minutes,
            shutdown.clone(),
        );

        tokio::signal::ctrl_c()
            .await
            .context("listen for shutdown signal")?;
        info!("Shutdown requested");
        shutdown.cancel();
        sweep.await.context("join sweep loop")?;
        anyhow::Ok(())
    })?;

    info!("Laundry Desk stopped");
    Ok(())
}
