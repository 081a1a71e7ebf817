//! Payment management for Laundry Desk.
//!
//! One `payments` row per order. Cash and card payments only track
//! paid/unpaid; mobile-wallet payments additionally carry an uploaded proof,
//! a reference number and an administrator review status.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::data_helpers::{normalize_label, now_timestamp, parse_opt_timestamp};
use crate::db::DbState;
use crate::error::{OrderError, Result};
use crate::orders::{self, OrderView};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileWallet,
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

/// Administrator review of an uploaded mobile-wallet proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// Stored as lowercase TEXT; `parse` is lenient about case and separators.
macro_rules! text_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $label:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }

            pub fn parse(raw: &str) -> Option<$ty> {
                match normalize_label(raw).as_str() {
                    $($label $(| $alias)* => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = OrderError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                $ty::parse(s).ok_or_else(|| {
                    OrderError::InvalidArgument(format!("invalid {}: '{}'", $what, s))
                })
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_str()?;
                $ty::parse(raw).ok_or_else(|| FromSqlError::Other(
                    format!("unknown {} '{}'", $what, raw).into(),
                ))
            }
        }
    };
}

text_enum!(PaymentMethod, "payment method", {
    Cash => "cash",
    MobileWallet => "mobile_wallet" | "wallet" | "e_wallet",
    Card => "card",
});

text_enum!(PaymentStatus, "payment status", {
    Paid => "paid",
    Unpaid => "unpaid",
});

text_enum!(ReviewStatus, "payment review status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

impl ReviewStatus {
    /// Exact stored label, without the case and separator folding of `parse`.
    pub fn from_label(raw: &str) -> Option<ReviewStatus> {
        [ReviewStatus::Pending, ReviewStatus::Approved, ReviewStatus::Rejected]
            .into_iter()
            .find(|r| r.as_str() == raw)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub payment_method: PaymentMethod,
    pub total_price: f64,
    pub payment_status: PaymentStatus,
    pub payment_proof: Option<String>,
    pub reference_id: Option<String>,
    pub payment_review_status: ReviewStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payment columns as they appear flattened into joined order views.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSummary {
    pub payment_id: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_proof: Option<String>,
    pub reference_id: Option<String>,
    pub payment_review_status: ReviewStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub order_id: i64,
    pub payment_method: PaymentMethod,
    pub total_price: f64,
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default)]
    pub payment_review_status: Option<ReviewStatus>,
    #[serde(default)]
    pub payment_proof: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

impl NewPayment {
    pub fn new(order_id: i64, payment_method: PaymentMethod, total_price: f64) -> Self {
        NewPayment {
            order_id,
            payment_method,
            total_price,
            payment_status: None,
            payment_review_status: None,
            payment_proof: None,
            reference_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentMethodStats {
    pub payment_method: PaymentMethod,
    pub order_count: i64,
    pub total_revenue: f64,
}

const PAYMENT_COLUMNS: &str = "id, order_id, payment_method, total_price, payment_status,
    payment_proof, reference_id, payment_review_status, created_at, updated_at";

fn payment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        order_id: row.get(1)?,
        payment_method: row.get(2)?,
        total_price: row.get(3)?,
        payment_status: row.get(4)?,
        payment_proof: row.get(5)?,
        reference_id: row.get(6)?,
        payment_review_status: row.get(7)?,
        created_at: parse_opt_timestamp(row.get(8)?),
        updated_at: parse_opt_timestamp(row.get(9)?),
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PaymentStore<'a> {
    db: &'a DbState,
}

impl<'a> PaymentStore<'a> {
    pub fn new(db: &'a DbState) -> Self {
        PaymentStore { db }
    }

    /// Insert the payment row for an order and return its id.
    ///
    /// `payment_status` defaults to `unpaid` and `payment_review_status` to
    /// `pending`. Proof and reference are only accepted for mobile-wallet
    /// payments.
    pub fn create(&self, payment: &NewPayment) -> Result<i64> {
        let conn = self.db.conn.lock()?;
        insert_payment(&conn, payment)
    }

    pub fn find_by_order(&self, order_id: i64) -> Result<Option<Payment>> {
        let conn = self.db.conn.lock()?;
        let payment = conn
            .query_row(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1"),
                params![order_id],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    /// Overwrite `payment_status` regardless of its current value.
    pub fn update_payment_status(&self, order_id: i64, status: PaymentStatus) -> Result<()> {
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "UPDATE payments SET payment_status = ?1, updated_at = ?2 WHERE order_id = ?3",
            params![status, now_timestamp(), order_id],
        )?;
        if changed == 0 {
            return Err(OrderError::payment_not_found(order_id));
        }
        info!(order_id, payment_status = %status, "Payment status updated");
        Ok(())
    }

    /// Attach a mobile-wallet proof and reference number. Every submission
    /// puts the payment back into `pending` review.
    ///
    /// Fails with `NotFound` when the order has no payment row or its payment
    /// is not a mobile-wallet payment.
    pub fn submit_payment_proof(
        &self,
        order_id: i64,
        proof: &str,
        reference_number: &str,
    ) -> Result<()> {
        let proof = proof.trim();
        if proof.is_empty() {
            return Err(OrderError::InvalidArgument("payment proof is required".into()));
        }
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "UPDATE payments SET
                payment_proof = ?1,
                reference_id = ?2,
                payment_review_status = ?3,
                updated_at = ?4
             WHERE order_id = ?5 AND payment_method = ?6",
            params![
                proof,
                reference_number.trim(),
                ReviewStatus::Pending,
                now_timestamp(),
                order_id,
                PaymentMethod::MobileWallet,
            ],
        )?;
        if changed == 0 {
            return Err(OrderError::payment_not_found(order_id));
        }
        info!(order_id, "Mobile-wallet payment proof submitted");
        Ok(())
    }

    /// Administrator review of a mobile-wallet payment. `status` must be
    /// exactly one of `pending`, `approved`, `rejected`.
    pub fn update_wallet_review_status(&self, order_id: i64, status: &str) -> Result<ReviewStatus> {
        let review = ReviewStatus::from_label(status).ok_or_else(|| {
            OrderError::InvalidArgument(format!("invalid payment review status: '{status}'"))
        })?;
        let conn = self.db.conn.lock()?;
        let changed = conn.execute(
            "UPDATE payments SET payment_review_status = ?1, updated_at = ?2
             WHERE order_id = ?3 AND payment_method = ?4",
            params![
                review,
                now_timestamp(),
                order_id,
                PaymentMethod::MobileWallet
            ],
        )?;
        if changed == 0 {
            return Err(OrderError::payment_not_found(order_id));
        }
        info!(order_id, review_status = %review, "Mobile-wallet payment reviewed");
        Ok(review)
    }

    /// Active mobile-wallet orders with the given review status, newest first.
    pub fn orders_by_wallet_review_status(&self, status: ReviewStatus) -> Result<Vec<OrderView>> {
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE p.payment_method = ?1
                 AND p.payment_review_status = ?2
                 AND o.moved_to_history_at IS NULL
                 AND o.is_deleted = 0
               ORDER BY o.created_at DESC, o.id DESC",
            orders::VIEW_SELECT
        ))?;
        let rows = stmt
            .query_map(
                params![PaymentMethod::MobileWallet, status],
                orders::view_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(review_status = %status, count = rows.len(), "Loaded wallet review queue");
        Ok(rows)
    }

    /// Order count and summed price per payment method over active orders.
    pub fn payment_method_analytics(&self) -> Result<Vec<PaymentMethodStats>> {
        let conn = self.db.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.payment_method, COUNT(*), COALESCE(SUM(p.total_price), 0.0)
             FROM payments p
             JOIN orders o ON o.id = p.order_id
             WHERE o.moved_to_history_at IS NULL AND o.is_deleted = 0
             GROUP BY p.payment_method
             ORDER BY p.payment_method",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(PaymentMethodStats {
                    payment_method: row.get(0)?,
                    order_count: row.get(1)?,
                    total_revenue: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }
}

/// Insert a payment row on an already-locked connection (also used inside
/// the booking transaction).
pub(crate) fn insert_payment(conn: &Connection, payment: &NewPayment) -> Result<i64> {
    if payment.total_price < 0.0 || !payment.total_price.is_finite() {
        return Err(OrderError::InvalidArgument(format!(
            "total price must be a non-negative amount, got {}",
            payment.total_price
        )));
    }
    if payment.payment_method != PaymentMethod::MobileWallet
        && (payment.payment_proof.is_some() || payment.reference_id.is_some())
    {
        return Err(OrderError::InvalidArgument(format!(
            "payment proof and reference are only accepted for mobile-wallet payments, not {}",
            payment.payment_method
        )));
    }

    let order_exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM orders WHERE id = ?1",
            params![payment.order_id],
            |row| row.get(0),
        )
        .optional()?;
    if order_exists.is_none() {
        return Err(OrderError::order_not_found(payment.order_id));
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM payments WHERE order_id = ?1",
            params![payment.order_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        warn!(
            order_id = payment.order_id,
            payment_id = existing_id,
            "Payment already recorded for order"
        );
        return Err(OrderError::PaymentExists(payment.order_id));
    }

    let now = now_timestamp();
    conn.execute(
        "INSERT INTO payments (
            order_id, payment_method, total_price, payment_status,
            payment_proof, reference_id, payment_review_status,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            payment.order_id,
            payment.payment_method,
            payment.total_price,
            payment.payment_status.unwrap_or(PaymentStatus::Unpaid),
            payment.payment_proof,
            payment.reference_id,
            payment
                .payment_review_status
                .unwrap_or(ReviewStatus::Pending),
            now,
        ],
    )?;
    let payment_id = conn.last_insert_rowid();

    info!(
        payment_id,
        order_id = payment.order_id,
        method = %payment.payment_method,
        amount = payment.total_price,
        "Payment recorded"
    );
    Ok(payment_id)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::seed_customer;
    use crate::db;
    use crate::history::HistoryArchive;
    use crate::orders::{NewOrder, OrderStore};

    fn book(db: &DbState, customer_id: i64, method: PaymentMethod, loads: i64) -> i64 {
        OrderStore::new(db)
            .book_order(&NewOrder::sample(customer_id, "wash_fold", loads, method), 150.0)
            .expect("book order")
    }

    /// Order row with no payment yet.
    fn bare_order(db: &DbState, customer_id: i64) -> i64 {
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO orders (customer_id, service_type, pickup_date, pickup_time, total_price)
             VALUES (?1, 'dry_clean', '2026-10-20', '10:00', 300.0)",
            params![customer_id],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn test_create_applies_defaults() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = bare_order(&db, customer);
        let store = PaymentStore::new(&db);

        let payment_id = store
            .create(&NewPayment::new(order_id, PaymentMethod::Cash, 300.0))
            .unwrap();
        assert!(payment_id > 0);

        let payment = store.find_by_order(order_id).unwrap().expect("payment");
        assert_eq!(payment.id, payment_id);
        assert_eq!(payment.payment_status, PaymentStatus::Unpaid);
        assert_eq!(payment.payment_review_status, ReviewStatus::Pending);
        assert_eq!(payment.payment_proof, None);
    }

    #[test]
    fn test_create_rejects_second_payment_and_missing_order() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = book(&db, customer, PaymentMethod::Cash, 1);
        let store = PaymentStore::new(&db);

        let err = store
            .create(&NewPayment::new(order_id, PaymentMethod::Card, 150.0))
            .unwrap_err();
        assert!(matches!(err, OrderError::PaymentExists(id) if id == order_id));

        let err = store
            .create(&NewPayment::new(9999, PaymentMethod::Cash, 10.0))
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_create_rejects_proof_on_cash_payment() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = bare_order(&db, customer);

        let mut payment = NewPayment::new(order_id, PaymentMethod::Cash, 300.0);
        payment.reference_id = Some("REF-1".into());
        let err = PaymentStore::new(&db).create(&payment).unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_update_payment_status_overwrites() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = book(&db, customer, PaymentMethod::Card, 2);
        let store = PaymentStore::new(&db);

        store
            .update_payment_status(order_id, PaymentStatus::Paid)
            .unwrap();
        store
            .update_payment_status(order_id, PaymentStatus::Paid)
            .unwrap();
        let payment = store.find_by_order(order_id).unwrap().unwrap();
        assert_eq!(payment.payment_status, PaymentStatus::Paid);

        let err = store
            .update_payment_status(4242, PaymentStatus::Unpaid)
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_submit_proof_resets_review_to_pending() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = book(&db, customer, PaymentMethod::MobileWallet, 1);
        let store = PaymentStore::new(&db);

        store
            .submit_payment_proof(order_id, "uploads/proof-1.png", "REF-001")
            .unwrap();
        store.update_wallet_review_status(order_id, "rejected").unwrap();

        store
            .submit_payment_proof(order_id, "uploads/proof-2.png", "REF-002")
            .unwrap();
        let payment = store.find_by_order(order_id).unwrap().unwrap();
        assert_eq!(payment.payment_proof.as_deref(), Some("uploads/proof-2.png"));
        assert_eq!(payment.reference_id.as_deref(), Some("REF-002"));
        assert_eq!(payment.payment_review_status, ReviewStatus::Pending);
    }

    #[test]
    fn test_submit_proof_on_cash_order_is_not_found() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let order_id = book(&db, customer, PaymentMethod::Cash, 1);
        let store = PaymentStore::new(&db);

        let err = store
            .submit_payment_proof(order_id, "uploads/proof.png", "REF")
            .unwrap_err();
        assert!(matches!(err, OrderError::NotFound { .. }));

        let payment = store.find_by_order(order_id).unwrap().unwrap();
        assert_eq!(payment.payment_proof, None);
        assert_eq!(payment.reference_id, None);
    }

    #[test]
    fn test_review_status_validation() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let wallet_order = book(&db, customer, PaymentMethod::MobileWallet, 1);
        let card_order = book(&db, customer, PaymentMethod::Card, 1);
        let store = PaymentStore::new(&db);

        let err = store
            .update_wallet_review_status(wallet_order, "refunded")
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");

        for loose in ["Approved", " pending ", "REJECTED"] {
            let err = store
                .update_wallet_review_status(wallet_order, loose)
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_argument", "{loose:?}");
        }

        assert_eq!(
            store
                .update_wallet_review_status(wallet_order, "approved")
                .unwrap(),
            ReviewStatus::Approved
        );

        let err = store
            .update_wallet_review_status(card_order, "approved")
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_wallet_review_queue_excludes_history() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        let first = book(&db, customer, PaymentMethod::MobileWallet, 1);
        let second = book(&db, customer, PaymentMethod::MobileWallet, 2);
        let deleted = book(&db, customer, PaymentMethod::MobileWallet, 3);
        book(&db, customer, PaymentMethod::Cash, 1);
        let store = PaymentStore::new(&db);

        HistoryArchive::new(&db).soft_delete(deleted).unwrap();

        let queue = store
            .orders_by_wallet_review_status(ReviewStatus::Pending)
            .unwrap();
        let ids: Vec<i64> = queue.iter().map(|v| v.order.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(queue[0].customer.customer_name.as_deref(), Some("Ana"));

        store.update_wallet_review_status(first, "approved").unwrap();
        let approved = store
            .orders_by_wallet_review_status(ReviewStatus::Approved)
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].order.id, first);
    }

    #[test]
    fn test_payment_method_analytics() {
        let db = db::test_db();
        let customer = seed_customer(&db, "a@example.com", "Ana");
        book(&db, customer, PaymentMethod::Cash, 1);
        book(&db, customer, PaymentMethod::Cash, 2);
        book(&db, customer, PaymentMethod::MobileWallet, 1);
        let deleted = book(&db, customer, PaymentMethod::Card, 4);
        HistoryArchive::new(&db).soft_delete(deleted).unwrap();

        let stats = PaymentStore::new(&db).payment_method_analytics().unwrap();
        assert_eq!(
            stats,
            vec![
                PaymentMethodStats {
                    payment_method: PaymentMethod::Cash,
                    order_count: 2,
                    total_revenue: 450.0,
                },
                PaymentMethodStats {
                    payment_method: PaymentMethod::MobileWallet,
                    order_count: 1,
                    total_revenue: 150.0,
                },
            ]
        );
    }

    #[test]
    fn test_text_enum_parsing() {
        assert_eq!(
            PaymentMethod::parse("Mobile-Wallet"),
            Some(PaymentMethod::MobileWallet)
        );
        assert_eq!(PaymentMethod::parse("cheque"), None);
        assert!("maybe".parse::<PaymentStatus>().is_err());
        assert_eq!(ReviewStatus::Rejected.to_string(), "rejected");
    }
}
