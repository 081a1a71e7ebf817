//! Periodic auto-advance sweep.
//!
//! Each pass picks up orders whose running timer has passed the expiry
//! threshold, moves them one step along the auto-advance progression and then
//! restarts the timer for the new stage. Orders that land on `ready` get their
//! timer stopped instead. Completed orders are never moved back into
//! processing; their leftover timer is just stopped. A failure on one order
//! is logged and counted; it never aborts the rest of the pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::Result;
use crate::orders::OrderStore;
use crate::stages::{Stage, AUTO_ADVANCE_PROGRESSION};
use crate::timers::TimerEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub examined: usize,
    pub advanced: usize,
    /// Orders that reached the last auto-advance stage and had their timer stopped.
    pub finished: usize,
    /// Completed orders whose timer was stopped without advancing.
    pub closed: usize,
    pub failed: usize,
}

pub fn run_sweep_once(db: &DbState, threshold_minutes: i64) -> Result<SweepReport> {
    run_sweep_once_at(db, threshold_minutes, Utc::now())
}

/// One pass over the expired timers as of `now`, oldest timer first.
pub fn run_sweep_once_at(
    db: &DbState,
    threshold_minutes: i64,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let timers = TimerEngine::new(db);
    let orders = OrderStore::new(db);
    let expired = timers.orders_with_expired_timers_at(threshold_minutes, now)?;

    let mut report = SweepReport {
        run_id: Uuid::new_v4(),
        examined: expired.len(),
        advanced: 0,
        finished: 0,
        closed: 0,
        failed: 0,
    };

    for order in &expired {
        let order_id = order.id;
        let outcome = if order.stage() == Some(Stage::Completed) {
            timers.stop_timer_at(order_id, now).map(|()| None)
        } else {
            orders.auto_advance_order(order_id).and_then(|next| {
                if next == AUTO_ADVANCE_PROGRESSION.last() {
                    timers.stop_timer_at(order_id, now)?;
                } else {
                    timers.start_timer_at(order_id, next, now)?;
                }
                Ok(Some(next))
            })
        };

        match outcome {
            Ok(None) => {
                report.closed += 1;
                debug!(run_id = %report.run_id, order_id, "Sweep stopped timer on completed order");
            }
            Ok(Some(next)) => {
                report.advanced += 1;
                if next == AUTO_ADVANCE_PROGRESSION.last() {
                    report.finished += 1;
                }
                debug!(run_id = %report.run_id, order_id, stage = %next, "Sweep advanced order");
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    run_id = %report.run_id,
                    order_id,
                    kind = e.kind(),
                    "Sweep failed to advance order: {e}"
                );
            }
        }
    }

    if report.examined > 0 {
        info!(
            run_id = %report.run_id,
            examined = report.examined,
            advanced = report.advanced,
            finished = report.finished,
            closed = report.closed,
            failed = report.failed,
            "Sweep pass complete"
        );
    }
    Ok(report)
}

/// Start the background sweep loop.
///
/// Runs every `interval_secs` seconds until `shutdown` is cancelled. Each pass
/// runs on the blocking pool since it holds the database lock.
pub fn start_sweep_loop(
    db: Arc<DbState>,
    interval_secs: u64,
    threshold_minutes: i64,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(interval_secs, threshold_minutes, "Sweep loop started");
    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let db = Arc::clone(&db);
            match tokio::task::spawn_blocking(move || run_sweep_once(&db, threshold_minutes)).await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Sweep pass failed: {e}"),
                Err(e) => error!("Sweep task panicked: {e}"),
            }
        }
        info!("Sweep loop stopped");
    })
}

// ===========================================================================
// Tests
// ===========================================================================
