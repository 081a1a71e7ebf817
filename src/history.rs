//! Order history: archival of completed orders and soft deletion.
//!
//! The history view is the union of completed orders and soft-deleted
//! orders. Rows leave the working set through [`HistoryArchive::move_to_history`]
//! or [`HistoryArchive::soft_delete`], come back through
//! [`HistoryArchive::restore_from_history`], and are only ever destroyed by
//! [`HistoryArchive::delete_from_history`].

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};

use crate::data_helpers::{format_timestamp, normalize_label};
use crate::db::DbState;
use crate::error::{OrderError, Result};
use crate::orders::{load_order, view_from_row, OrderView, VIEW_SELECT};
use crate::stages::Stage;

pub const HISTORY_ITEM_TYPE: &str = "service_order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Archived and not soft-deleted.
    Completed,
    /// Soft-deleted, archived or not.
    Deleted,
}

impl FromStr for HistoryKind {
    type Err = OrderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "completed" => Ok(HistoryKind::Completed),
            "deleted" => Ok(HistoryKind::Deleted),
            _ => Err(OrderError::InvalidArgument(format!(
                "unknown history type '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    #[serde(rename = "type")]
    pub item_type: &'static str,
    #[serde(flatten)]
    pub view: OrderView,
}

impl HistoryItem {
    /// Most recent of archival, deletion and last update; history is sorted
    /// on this, newest first.
    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        let order = &self.view.order;
        [order.moved_to_history_at, order.deleted_at, order.updated_at]
            .into_iter()
            .flatten()
            .max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub completed: usize,
    pub deleted: usize,
    pub total: usize,
}

pub struct HistoryArchive<'a> {
    db: &'a DbState,
}

impl<'a> HistoryArchive<'a> {
    pub fn new(db: &'a DbState) -> Self {
        HistoryArchive { db }
    }

    pub fn move_to_history(&self, order_id: i64) -> Result<()> {
        self.move_to_history_at(order_id, Utc::now())
    }

    /// Archive a completed order. Only `completed`, not-yet-archived orders
    /// are eligible.
    pub fn move_to_history_at(&self, order_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE orders SET
                moved_to_history_at = ?1,
                status = ?2,
                process_stage = ?2,
                updated_at = ?1
             WHERE id = ?3 AND status = ?2 AND moved_to_history_at IS NULL",
            params![ts, Stage::Completed, order_id],
        )?;
        if changed == 0 {
            let order = load_order(&conn, order_id)?
                .ok_or_else(|| OrderError::order_not_found(order_id))?;
            let reason = if order.is_archived() {
                "already in history".to_string()
            } else {
                format!("status is '{}', not completed", order.status)
            };
            return Err(OrderError::NotEligible { order_id, reason });
        }
        info!(order_id, "Order moved to history");
        Ok(())
    }

    pub fn soft_delete(&self, order_id: i64) -> Result<()> {
        self.soft_delete_at(order_id, Utc::now())
    }

    pub fn soft_delete_at(&self, order_id: i64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let order =
            load_order(&conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
        if order.is_deleted {
            return Err(OrderError::AlreadyDeleted(order_id));
        }
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE orders SET is_deleted = 1, deleted_at = ?1, updated_at = ?1
             WHERE id = ?2 AND is_deleted = 0",
            params![ts, order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::AlreadyDeleted(order_id));
        }
        info!(order_id, "Order soft-deleted");
        Ok(())
    }

    /// Put an archived or soft-deleted order back into the working set,
    /// clearing both markers.
    pub fn restore_from_history(&self, order_id: i64) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "UPDATE orders SET
                moved_to_history_at = NULL,
                is_deleted = 0,
                deleted_at = NULL,
                updated_at = ?1
             WHERE id = ?2 AND (moved_to_history_at IS NOT NULL OR is_deleted = 1)",
            params![format_timestamp(Utc::now()), order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::NotFound {
                entity: "history entry",
                id: order_id,
            });
        }
        info!(order_id, "Order restored from history");
        Ok(())
    }

    /// Permanently delete an archived or soft-deleted order (its payment row
    /// cascades). Live orders are never purged.
    pub fn delete_from_history(&self, order_id: i64) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "DELETE FROM orders
             WHERE id = ?1 AND (moved_to_history_at IS NOT NULL OR is_deleted = 1)",
            params![order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::NotFound {
                entity: "history entry",
                id: order_id,
            });
        }
        info!(order_id, "Order purged from history");
        Ok(())
    }

    /// Completed or soft-deleted orders, newest history event first.
    pub fn get_history(&self) -> Result<Vec<HistoryItem>> {
        self.query_history("o.status = 'completed' OR o.is_deleted = 1")
    }

    pub fn get_history_by_type(&self, kind: HistoryKind) -> Result<Vec<HistoryItem>> {
        match kind {
            HistoryKind::Completed => {
                self.query_history("o.moved_to_history_at IS NOT NULL AND o.is_deleted = 0")
            }
            HistoryKind::Deleted => self.query_history("o.is_deleted = 1"),
        }
    }

    pub fn summary(&self) -> Result<HistorySummary> {
        let completed = self.get_history_by_type(HistoryKind::Completed)?.len();
        let deleted = self.get_history_by_type(HistoryKind::Deleted)?.len();
        let total = self.get_history()?.len();
        Ok(HistorySummary {
            completed,
            deleted,
            total,
        })
    }

    fn query_history(&self, filter: &str) -> Result<Vec<HistoryItem>> {
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&format!("{VIEW_SELECT} WHERE {filter}"))?;
        let views = stmt
            .query_map([], view_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        let mut items: Vec<HistoryItem> = views
            .into_iter()
            .filter(|v| seen.insert(v.order.id))
            .map(|view| HistoryItem {
                item_type: HISTORY_ITEM_TYPE,
                view,
            })
            .collect();
        items.sort_by(|a, b| {
            b.sort_key()
                .cmp(&a.sort_key())
                .then_with(|| b.view.order.id.cmp(&a.view.order.id))
        });
        debug!(filter, count = items.len(), "Loaded history");
        Ok(items)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
