//! Service order records and stage transitions.
//!
//! Every stage write goes through [`write_stage`], which updates `status` and
//! `process_stage` together and only succeeds if the row still holds the
//! stage the caller read. A zero-row update surfaces as
//! [`OrderError::Conflict`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::customers;
use crate::data_helpers::{now_timestamp, parse_opt_timestamp, parse_photo_refs};
use crate::db::DbState;
use crate::error::{OrderError, Result};
use crate::payments::{self, NewPayment, PaymentMethod, PaymentSummary};
use crate::stages::{auto_advance_origin, Stage, AUTO_ADVANCE_PROGRESSION, FULL_PROGRESSION};

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub service_type: String,
    pub pickup_date: String,
    pub pickup_time: String,
    pub load_count: i64,
    pub total_price: f64,
    pub instructions: Option<String>,
    pub photos: Vec<String>,
    /// Raw stored label; may hold a value outside [`Stage`].
    pub status: String,
    pub process_stage: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub moved_to_history_at: Option<DateTime<Utc>>,
    pub timer_start: Option<DateTime<Utc>>,
    pub timer_end: Option<DateTime<Utc>>,
    pub current_timer_status: Option<String>,
    pub auto_advance_enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn stage(&self) -> Option<Stage> {
        Stage::parse(&self.status)
    }

    pub fn is_archived(&self) -> bool {
        self.moved_to_history_at.is_some()
    }

    /// Timer started and not yet stopped.
    pub fn is_timer_running(&self) -> bool {
        self.timer_start.is_some() && self.timer_end.is_none()
    }
}

/// Customer columns joined into order views.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CustomerSummary {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub customer_email: Option<String>,
    pub account_role: Option<String>,
}

/// Flat read view: order + customer profile/account + payment.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    #[serde(flatten)]
    pub customer: CustomerSummary,
    #[serde(flatten)]
    pub payment: Option<PaymentSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_id: i64,
    pub service_type: String,
    pub pickup_date: String,
    pub pickup_time: String,
    pub load_count: i64,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    pub payment_method: PaymentMethod,
}

#[cfg(test)]
impl NewOrder {
    /// Booking fixture with a fixed pickup slot.
    pub(crate) fn sample(
        customer_id: i64,
        service_type: &str,
        load_count: i64,
        payment_method: PaymentMethod,
    ) -> Self {
        NewOrder {
            customer_id,
            service_type: service_type.to_string(),
            pickup_date: "2026-10-20".to_string(),
            pickup_time: "09:00".to_string(),
            load_count,
            instructions: None,
            photos: Vec::new(),
            payment_method,
        }
    }
}

macro_rules! order_columns {
    () => {
        "o.id, o.customer_id, o.service_type, o.pickup_date, o.pickup_time, o.load_count,
         o.total_price, o.instructions, o.photos, o.status, o.process_stage, o.is_deleted,
         o.deleted_at, o.moved_to_history_at, o.timer_start, o.timer_end,
         o.current_timer_status, o.auto_advance_enabled, o.created_at, o.updated_at"
    };
}

pub(crate) const ORDER_COLUMNS: &str = order_columns!();

const ORDER_COLUMN_COUNT: usize = 20;

pub(crate) const VIEW_SELECT: &str = concat!(
    "SELECT ",
    order_columns!(),
    ", cp.full_name, cp.phone_number, cp.address, a.email, a.role,
       p.id, p.payment_method, p.payment_status, p.payment_proof, p.reference_id,
       p.payment_review_status
     FROM orders o
     LEFT JOIN customer_profiles cp ON cp.id = o.customer_id
     LEFT JOIN accounts a ON a.id = cp.account_id
     LEFT JOIN payments p ON p.order_id = o.id"
);

pub(crate) fn order_from_row(row: &rusqlite::Row) -> rusqlite::Result<Order> {
    let photos: String = row.get(8)?;
    Ok(Order {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        service_type: row.get(2)?,
        pickup_date: row.get(3)?,
        pickup_time: row.get(4)?,
        load_count: row.get(5)?,
        total_price: row.get(6)?,
        instructions: row.get(7)?,
        photos: parse_photo_refs(&photos),
        status: row.get(9)?,
        process_stage: row.get(10)?,
        is_deleted: row.get::<_, i64>(11)? != 0,
        deleted_at: parse_opt_timestamp(row.get(12)?),
        moved_to_history_at: parse_opt_timestamp(row.get(13)?),
        timer_start: parse_opt_timestamp(row.get(14)?),
        timer_end: parse_opt_timestamp(row.get(15)?),
        current_timer_status: row.get(16)?,
        auto_advance_enabled: row.get::<_, i64>(17)? != 0,
        created_at: parse_opt_timestamp(row.get(18)?),
        updated_at: parse_opt_timestamp(row.get(19)?),
    })
}

pub(crate) fn view_from_row(row: &rusqlite::Row) -> rusqlite::Result<OrderView> {
    let order = order_from_row(row)?;
    let base = ORDER_COLUMN_COUNT;
    let customer = CustomerSummary {
        customer_name: row.get(base)?,
        customer_phone: row.get(base + 1)?,
        customer_address: row.get(base + 2)?,
        customer_email: row.get(base + 3)?,
        account_role: row.get(base + 4)?,
    };
    let payment = match row.get::<_, Option<i64>>(base + 5)? {
        Some(payment_id) => Some(PaymentSummary {
            payment_id,
            payment_method: row.get(base + 6)?,
            payment_status: row.get(base + 7)?,
            payment_proof: row.get(base + 8)?,
            reference_id: row.get(base + 9)?,
            payment_review_status: row.get(base + 10)?,
        }),
        None => None,
    };
    Ok(OrderView {
        order,
        customer,
        payment,
    })
}

pub(crate) fn load_order(conn: &Connection, order_id: i64) -> Result<Option<Order>> {
    let order = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = ?1"),
            params![order_id],
            order_from_row,
        )
        .optional()?;
    Ok(order)
}

/// Move an order to `next`, writing `status` and `process_stage` together.
///
/// The update is conditional on the row still holding the `status` /
/// `process_stage` pair the caller read.
pub(crate) fn write_stage(conn: &Connection, order: &Order, next: Stage) -> Result<()> {
    let changed = conn.execute(
        "UPDATE orders SET status = ?1, process_stage = ?1, updated_at = ?2
         WHERE id = ?3 AND status = ?4 AND process_stage IS ?5",
        params![
            next,
            now_timestamp(),
            order.id,
            order.status,
            order.process_stage
        ],
    )?;
    if changed == 0 {
        warn!(
            order_id = order.id,
            expected = %order.status,
            next = %next,
            "Stage write lost to a concurrent update"
        );
        return Err(OrderError::Conflict {
            order_id: order.id,
            expected: order.status.clone(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct OrderStore<'a> {
    db: &'a DbState,
}

impl<'a> OrderStore<'a> {
    pub fn new(db: &'a DbState) -> Self {
        OrderStore { db }
    }

    /// Create an order in `pending` together with its payment row.
    ///
    /// `total_price = load_count × price_per_load`, rounded to cents.
    pub fn book_order(&self, new_order: &NewOrder, price_per_load: f64) -> Result<i64> {
        if new_order.load_count < 1 {
            return Err(OrderError::InvalidArgument(format!(
                "load count must be at least 1, got {}",
                new_order.load_count
            )));
        }
        if price_per_load < 0.0 || !price_per_load.is_finite() {
            return Err(OrderError::InvalidArgument(format!(
                "price per load must be non-negative, got {price_per_load}"
            )));
        }
        if new_order.service_type.trim().is_empty() {
            return Err(OrderError::InvalidArgument("service type is required".into()));
        }

        let total_price = (new_order.load_count as f64 * price_per_load * 100.0).round() / 100.0;
        let photos = serde_json::to_string(&new_order.photos)
            .map_err(|e| OrderError::InvalidArgument(format!("photo references: {e}")))?;

        let conn = self.db.conn.lock()?;
        if !customers::profile_exists(&conn, new_order.customer_id)? {
            return Err(OrderError::NotFound {
                entity: "customer",
                id: new_order.customer_id,
            });
        }

        conn.execute_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<i64> {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO orders (
                    customer_id, service_type, pickup_date, pickup_time, load_count,
                    total_price, instructions, photos, status, process_stage,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?10)",
                params![
                    new_order.customer_id,
                    new_order.service_type.trim(),
                    new_order.pickup_date,
                    new_order.pickup_time,
                    new_order.load_count,
                    total_price,
                    new_order.instructions,
                    photos,
                    Stage::Pending,
                    now,
                ],
            )?;
            let order_id = conn.last_insert_rowid();

            payments::insert_payment(
                &conn,
                &NewPayment::new(order_id, new_order.payment_method, total_price),
            )?;
            Ok(order_id)
        })();

        match result {
            Ok(order_id) => {
                conn.execute_batch("COMMIT")?;
                info!(
                    order_id,
                    customer_id = new_order.customer_id,
                    loads = new_order.load_count,
                    total_price,
                    "Order booked"
                );
                Ok(order_id)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Order joined with customer profile, account and payment.
    /// `Ok(None)` when the order does not exist.
    pub fn get_order_by_id(&self, order_id: i64) -> Result<Option<OrderView>> {
        let conn = self.db.conn.lock()?;
        let view = conn
            .query_row(
                &format!("{VIEW_SELECT} WHERE o.id = ?1"),
                params![order_id],
                view_from_row,
            )
            .optional()?;
        debug!(order_id, found = view.is_some(), "Loaded order");
        Ok(view)
    }

    /// Orders in the working set (not archived, not soft-deleted), newest first.
    pub fn list_active_orders(&self) -> Result<Vec<OrderView>> {
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{VIEW_SELECT}
             WHERE o.moved_to_history_at IS NULL AND o.is_deleted = 0
             ORDER BY o.created_at DESC, o.id DESC"
        ))?;
        let views = stmt
            .query_map([], view_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(views)
    }

    /// Administrator approval: `pending → approved` only.
    pub fn approve_order(&self, order_id: i64) -> Result<Stage> {
        let conn = self.db.conn.lock()?;
        let order =
            load_order(&conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
        if order.stage() != Some(Stage::Pending) {
            return Err(OrderError::NotEligible {
                order_id,
                reason: format!("approval requires a pending order, found '{}'", order.status),
            });
        }
        write_stage(&conn, &order, Stage::Approved)?;
        info!(order_id, "Order approved");
        Ok(Stage::Approved)
    }

    /// Explicit advance along the full progression
    /// (`pending → approved → … → completed`).
    pub fn advance_to_next_status(&self, order_id: i64) -> Result<Stage> {
        let conn = self.db.conn.lock()?;
        let order =
            load_order(&conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
        let next = order
            .stage()
            .and_then(|current| FULL_PROGRESSION.next(current).ok())
            .ok_or_else(|| OrderError::InvalidTransition {
                order_id,
                from: order.status.clone(),
            })?;
        write_stage(&conn, &order, next)?;
        info!(
            order_id,
            progression = FULL_PROGRESSION.name,
            from = %order.status,
            to = %next,
            "Order advanced"
        );
        Ok(next)
    }

    /// Timer-driven advance along the auto-advance progression. Stays at
    /// `ready` once reached.
    pub fn auto_advance_order(&self, order_id: i64) -> Result<Stage> {
        let conn = self.db.conn.lock()?;
        auto_advance_locked(&conn, order_id)
    }
}

pub(crate) fn auto_advance_locked(conn: &Connection, order_id: i64) -> Result<Stage> {
    let order =
        load_order(conn, order_id)?.ok_or_else(|| OrderError::order_not_found(order_id))?;
    let origin = auto_advance_origin(&order.status, order.process_stage.as_deref());
    let next = AUTO_ADVANCE_PROGRESSION
        .next(origin)
        .map_err(|_| OrderError::InvalidTransition {
            order_id,
            from: origin.to_string(),
        })?;
    write_stage(conn, &order, next)?;
    if next == origin {
        debug!(
            order_id,
            progression = AUTO_ADVANCE_PROGRESSION.name,
            stage = %next,
            "Auto-advance clamped at final stage"
        );
    } else {
        info!(
            order_id,
            progression = AUTO_ADVANCE_PROGRESSION.name,
            from = %origin,
            to = %next,
            "Order auto-advanced"
        );
    }
    Ok(next)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::seed_customer;
    use crate::db;

    fn booked(db: &DbState) -> i64 {
        let customer = seed_customer(db, "ana@example.com", "Ana Reyes");
        OrderStore::new(db)
            .book_order(
                &NewOrder::sample(customer, "wash_fold", 3, PaymentMethod::Cash),
                150.0,
            )
            .expect("book order")
    }

    fn stage_columns(db: &DbState, order_id: i64) -> (String, Option<String>) {
        let conn = db.conn.lock().unwrap();
        conn.query_row(
            "SELECT status, process_stage FROM orders WHERE id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_book_order_creates_pending_order_with_payment() {
        let db = db::test_db();
        let order_id = booked(&db);

        let view = OrderStore::new(&db)
            .get_order_by_id(order_id)
            .unwrap()
            .expect("order view");
        assert_eq!(view.order.status, "pending");
        assert_eq!(view.order.process_stage.as_deref(), Some("pending"));
        assert_eq!(view.order.total_price, 450.0);
        assert!(view.order.timer_start.is_none());
        assert!(!view.order.auto_advance_enabled);
        assert_eq!(view.customer.customer_name.as_deref(), Some("Ana Reyes"));
        assert_eq!(view.customer.customer_email.as_deref(), Some("ana@example.com"));
        assert_eq!(view.customer.account_role.as_deref(), Some("customer"));

        let payment = view.payment.expect("payment summary");
        assert_eq!(payment.payment_method, PaymentMethod::Cash);
        assert_eq!(payment.payment_status, payments::PaymentStatus::Unpaid);
    }

    #[test]
    fn test_book_order_validation() {
        let db = db::test_db();
        let customer = seed_customer(&db, "ana@example.com", "Ana");
        let store = OrderStore::new(&db);

        let err = store
            .book_order(&NewOrder::sample(customer, "wash_fold", 0, PaymentMethod::Cash), 150.0)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");

        let err = store
            .book_order(&NewOrder::sample(777, "wash_fold", 1, PaymentMethod::Cash), 150.0)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        assert!(store.list_active_orders().unwrap().is_empty());
    }

    #[test]
    fn test_get_order_by_id_missing_is_none() {
        let db = db::test_db();
        assert!(OrderStore::new(&db).get_order_by_id(31337).unwrap().is_none());
    }

    #[test]
    fn test_order_view_serializes_flat() {
        let db = db::test_db();
        let order_id = booked(&db);
        let view = OrderStore::new(&db)
            .get_order_by_id(order_id)
            .unwrap()
            .unwrap();

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], order_id);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["customer_name"], "Ana Reyes");
        assert_eq!(json["payment_method"], "cash");
        assert_eq!(json["payment_review_status"], "pending");
    }

    #[test]
    fn test_advance_to_next_status_walks_full_sequence() {
        let db = db::test_db();
        let order_id = booked(&db);
        let store = OrderStore::new(&db);

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(store.advance_to_next_status(order_id).unwrap());
        }
        assert_eq!(
            seen,
            vec![
                Stage::Approved,
                Stage::Washing,
                Stage::Drying,
                Stage::Folding,
                Stage::Ready,
                Stage::Completed,
            ]
        );
        assert_eq!(
            stage_columns(&db, order_id),
            ("completed".to_string(), Some("completed".to_string()))
        );

        let err = store.advance_to_next_status(order_id).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn test_advance_rejects_unknown_status_and_missing_order() {
        let db = db::test_db();
        let order_id = booked(&db);
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE orders SET status = 'on_hold' WHERE id = ?1",
                params![order_id],
            )
            .unwrap();
        let store = OrderStore::new(&db);

        let err = store.advance_to_next_status(order_id).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert_eq!(stage_columns(&db, order_id).0, "on_hold");

        let err = store.advance_to_next_status(8080).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_auto_advance_clamps_at_ready() {
        let db = db::test_db();
        let order_id = booked(&db);
        let store = OrderStore::new(&db);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(store.auto_advance_order(order_id).unwrap());
        }
        assert_eq!(
            seen,
            vec![Stage::Washing, Stage::Drying, Stage::Folding, Stage::Ready]
        );
        assert_eq!(store.auto_advance_order(order_id).unwrap(), Stage::Ready);
        assert_eq!(store.auto_advance_order(order_id).unwrap(), Stage::Ready);
        assert_eq!(
            stage_columns(&db, order_id),
            ("ready".to_string(), Some("ready".to_string()))
        );
    }

    #[test]
    fn test_auto_advance_reads_process_stage_first() {
        let db = db::test_db();
        let order_id = booked(&db);
        db.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE orders SET status = 'approved', process_stage = 'drying' WHERE id = ?1",
                params![order_id],
            )
            .unwrap();

        let next = OrderStore::new(&db).auto_advance_order(order_id).unwrap();
        assert_eq!(next, Stage::Folding);
        assert_eq!(
            stage_columns(&db, order_id),
            ("folding".to_string(), Some("folding".to_string()))
        );
    }

    #[test]
    fn test_auto_advance_from_approved_starts_washing() {
        let db = db::test_db();
        let order_id = booked(&db);
        let store = OrderStore::new(&db);
        store.approve_order(order_id).unwrap();

        assert_eq!(store.auto_advance_order(order_id).unwrap(), Stage::Washing);
    }

    #[test]
    fn test_approve_only_from_pending() {
        let db = db::test_db();
        let order_id = booked(&db);
        let store = OrderStore::new(&db);

        assert_eq!(store.approve_order(order_id).unwrap(), Stage::Approved);
        let err = store.approve_order(order_id).unwrap_err();
        assert_eq!(err.kind(), "not_eligible");
    }

    #[test]
    fn test_write_stage_detects_stale_read() {
        let db = db::test_db();
        let order_id = booked(&db);
        let conn = db.conn.lock().unwrap();
        let stale = load_order(&conn, order_id).unwrap().unwrap();

        write_stage(&conn, &stale, Stage::Approved).unwrap();
        let err = write_stage(&conn, &stale, Stage::Approved).unwrap_err();
        assert!(matches!(err, OrderError::Conflict { order_id: id, .. } if id == order_id));

        let status: String = conn
            .query_row(
                "SELECT status FROM orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "approved");
    }

    #[test]
    fn test_list_active_orders_newest_first() {
        let db = db::test_db();
        let customer = seed_customer(&db, "ana@example.com", "Ana");
        let store = OrderStore::new(&db);
        let first = store
            .book_order(&NewOrder::sample(customer, "wash_fold", 1, PaymentMethod::Cash), 100.0)
            .unwrap();
        let second = store
            .book_order(&NewOrder::sample(customer, "dry_clean", 2, PaymentMethod::Card), 100.0)
            .unwrap();

        let ids: Vec<i64> = store
            .list_active_orders()
            .unwrap()
            .into_iter()
            .map(|v| v.order.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }
}
