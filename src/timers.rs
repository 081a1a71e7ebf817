//! Per-order stage timer.
//!
//! A timer is "running" while `timer_start` is set and `timer_end` is not.
//! Orders whose running timer is older than a threshold, with auto-advance
//! enabled, are fed to the sweep (see [`crate::sweep`]).

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data_helpers::format_timestamp;
use crate::db::DbState;
use crate::error::{OrderError, Result};
use crate::orders::{load_order, order_from_row, Order, ORDER_COLUMNS};
use crate::stages::Stage;

pub const DEFAULT_EXPIRY_THRESHOLD_MINUTES: i64 = 30;

/// Timer payload returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerStatus {
    pub timer_start: Option<DateTime<Utc>>,
    pub timer_end: Option<DateTime<Utc>>,
    pub current_timer_status: Option<String>,
    pub auto_advance_enabled: bool,
    /// Whole seconds.
    pub elapsed_time: i64,
    pub is_running: bool,
}

impl TimerStatus {
    pub fn of(order: &Order, now: DateTime<Utc>) -> Self {
        TimerStatus {
            timer_start: order.timer_start,
            timer_end: order.timer_end,
            current_timer_status: order.current_timer_status.clone(),
            auto_advance_enabled: order.auto_advance_enabled,
            elapsed_time: elapsed_seconds(order.timer_start, order.timer_end, now),
            is_running: order.is_timer_running(),
        }
    }
}

/// `end - start` when both are set, `now - start` while running, else 0.
/// Never negative.
pub fn elapsed_seconds(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    match (start, end) {
        (Some(start), Some(end)) => (end - start).num_seconds().max(0),
        (Some(start), None) => (now - start).num_seconds().max(0),
        _ => 0,
    }
}

pub struct TimerEngine<'a> {
    db: &'a DbState,
}

impl<'a> TimerEngine<'a> {
    pub fn new(db: &'a DbState) -> Self {
        TimerEngine { db }
    }

    pub fn start_timer(&self, order_id: i64, stage: Stage) -> Result<()> {
        self.start_timer_at(order_id, stage, Utc::now())
    }

    /// Start (or restart) the timer for `stage` and enable auto-advance.
    ///
    /// A running timer is overwritten and its elapsed time discarded.
    pub fn start_timer_at(&self, order_id: i64, stage: Stage, now: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let order =
            load_order(&conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
        if order.is_timer_running() {
            warn!(
                order_id,
                previous = order.current_timer_status.as_deref().unwrap_or(""),
                elapsed_secs = elapsed_seconds(order.timer_start, None, now),
                "Restarting a running timer; elapsed time discarded"
            );
        }

        let ts = format_timestamp(now);
        conn.execute(
            "UPDATE orders SET
                timer_start = ?1,
                timer_end = NULL,
                current_timer_status = ?2,
                auto_advance_enabled = 1,
                updated_at = ?1
             WHERE id = ?3",
            params![ts, stage, order_id],
        )?;
        info!(order_id, stage = %stage, "Timer started");
        Ok(())
    }

    pub fn stop_timer(&self, order_id: i64) -> Result<()> {
        self.stop_timer_at(order_id, Utc::now())
    }

    /// Stop the timer and clear `current_timer_status`.
    ///
    /// Accepted on orders without a timer; `timer_end` is only written when
    /// `timer_start` is set.
    pub fn stop_timer_at(&self, order_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE orders SET
                timer_end = CASE WHEN timer_start IS NULL THEN NULL ELSE ?1 END,
                current_timer_status = NULL,
                updated_at = ?1
             WHERE id = ?2",
            params![ts, order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::order_not_found(order_id));
        }
        info!(order_id, "Timer stopped");
        Ok(())
    }

    pub fn timer_status(&self, order_id: i64) -> Result<TimerStatus> {
        self.timer_status_at(order_id, Utc::now())
    }

    pub fn timer_status_at(&self, order_id: i64, now: DateTime<Utc>) -> Result<TimerStatus> {
        let conn = self.db.conn.lock()?;
        let order =
            load_order(&conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
        Ok(TimerStatus::of(&order, now))
    }

    pub fn toggle_auto_advance(&self, order_id: i64, enabled: bool) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "UPDATE orders SET auto_advance_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, format_timestamp(Utc::now()), order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::order_not_found(order_id));
        }
        info!(order_id, enabled, "Auto-advance toggled");
        Ok(())
    }

    /// Running timers on orders still in the working set, oldest start first.
    pub fn orders_with_active_timers(&self) -> Result<Vec<Order>> {
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o
             WHERE o.timer_start IS NOT NULL
               AND o.timer_end IS NULL
               AND o.moved_to_history_at IS NULL
               AND o.is_deleted = 0
             ORDER BY o.timer_start ASC, o.id ASC"
        ))?;
        let mut orders = stmt
            .query_map([], order_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        // Stored text may mix timestamp formats; order by the parsed value.
        orders.sort_by_key(|o| o.timer_start);
        Ok(orders)
    }

    pub fn orders_with_expired_timers(&self, threshold_minutes: i64) -> Result<Vec<Order>> {
        self.orders_with_expired_timers_at(threshold_minutes, Utc::now())
    }

    /// Active timers with auto-advance enabled that have run for at least
    /// `threshold_minutes`.
    pub fn orders_with_expired_timers_at(
        &self,
        threshold_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        if threshold_minutes < 0 {
            return Err(OrderError::InvalidArgument(format!(
                "threshold must be non-negative, got {threshold_minutes} minutes"
            )));
        }
        let threshold = Duration::minutes(threshold_minutes);
        let expired: Vec<Order> = self
            .orders_with_active_timers()?
            .into_iter()
            .filter(|o| o.auto_advance_enabled)
            .filter(|o| o.timer_start.is_some_and(|start| now - start >= threshold))
            .collect();
        debug!(threshold_minutes, count = expired.len(), "Expired timers");
        Ok(expired)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
