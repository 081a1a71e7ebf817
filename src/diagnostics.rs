//! Diagnostics for Laundry Desk.
//!
//! Provides:
//! - **Health snapshot**: schema version and working-set counts, logged at startup
//! - **Log rotation helpers**: used by `lib.rs` to keep the rolling log directory bounded

use rusqlite::params;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::db::DbState;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix handed to the daily rolling appender.
pub const LOG_FILE_PREFIX: &str = "laundry";

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub schema_version: i64,
    pub db_path: PathBuf,
    pub active_orders: i64,
    pub running_timers: i64,
    pub history_entries: i64,
    pub pending_wallet_reviews: i64,
}

pub fn health_snapshot(db: &DbState) -> Result<HealthSnapshot> {
    let conn = db.conn.lock()?;
    let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, params![], |r| r.get(0)) };

    let snapshot = HealthSnapshot {
        schema_version: count("SELECT COALESCE(MAX(version), 0) FROM schema_version")?,
        db_path: db.db_path.clone(),
        active_orders: count(
            "SELECT COUNT(*) FROM orders WHERE moved_to_history_at IS NULL AND is_deleted = 0",
        )?,
        running_timers: count(
            "SELECT COUNT(*) FROM orders
             WHERE timer_start IS NOT NULL AND timer_end IS NULL
               AND moved_to_history_at IS NULL AND is_deleted = 0",
        )?,
        history_entries: count(
            "SELECT COUNT(*) FROM orders WHERE status = 'completed' OR is_deleted = 1",
        )?,
        pending_wallet_reviews: count(
            "SELECT COUNT(*) FROM payments
             WHERE payment_method = 'mobile_wallet'
               AND payment_proof IS NOT NULL
               AND payment_review_status = 'pending'",
        )?,
    };
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`. Returns the number of files removed.
pub fn prune_old_logs(log_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // Newest first; date-suffixed names break mtime ties.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    if removed > 0 {
        debug!(removed, dir = %log_dir.display(), "Pruned old log files");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::seed_customer;
    use crate::db;
    use crate::orders::{NewOrder, OrderStore};
    use crate::payments::PaymentMethod;
    use crate::stages::Stage;
    use crate::timers::TimerEngine;
    use std::time::Duration;

    #[test]
    fn test_health_snapshot_counts() {
        let db = db::test_db();
        let customer = seed_customer(&db, "ana@example.com", "Ana");
        let store = OrderStore::new(&db);
        let timed = store
            .book_order(&NewOrder::sample(customer, "wash_fold", 1, PaymentMethod::Cash), 100.0)
            .unwrap();
        store
            .book_order(&NewOrder::sample(customer, "dry_clean", 1, PaymentMethod::Card), 100.0)
            .unwrap();
        TimerEngine::new(&db).start_timer(timed, Stage::Pending).unwrap();

        let health = health_snapshot(&db).unwrap();
        assert_eq!(health.schema_version, db::CURRENT_SCHEMA_VERSION as i64);
        assert_eq!(health.active_orders, 2);
        assert_eq!(health.running_timers, 1);
        assert_eq!(health.history_entries, 0);
        assert_eq!(health.pending_wallet_reviews, 0);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["runningTimers"], 1);
    }

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let dir = std::env::temp_dir().join(format!("laundry-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();

        let base = SystemTime::now() - Duration::from_secs(86_400 * 30);
        for day in 1..=12 {
            let path = dir.join(format!("{LOG_FILE_PREFIX}.2026-10-{day:02}"));
            let file = fs::File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(86_400 * day))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        assert_eq!(prune_old_logs(&dir), 2);
        assert!(!dir.join("laundry.2026-10-01").exists());
        assert!(!dir.join("laundry.2026-10-02").exists());
        assert!(dir.join("laundry.2026-10-03").exists());
        assert!(dir.join("laundry.2026-10-12").exists());
        assert!(dir.join("notes.txt").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = std::env::temp_dir().join(format!("laundry-none-{}", uuid::Uuid::new_v4()));
        assert_eq!(prune_old_logs(&dir), 0);
    }
}
