//! Error taxonomy for the order lifecycle core.
//!
//! Business-rule failures each get their own variant so the HTTP layer can
//! map them to status codes via [`OrderError::kind`]. Storage failures are
//! passed through unchanged as [`OrderError::Database`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrderError>;

#[derive(Debug, Error)]
pub enum OrderError {
    /// The order or payment row does not exist, or does not match an extra
    /// predicate the operation requires (e.g. mobile-wallet method).
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("order {order_id} is not eligible: {reason}")]
    NotEligible { order_id: i64, reason: String },

    #[error("order {0} is already deleted")]
    AlreadyDeleted(i64),

    #[error("order {order_id} has no next stage after '{from}'")]
    InvalidTransition { order_id: i64, from: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A conditional write matched zero rows because another writer moved
    /// the order first.
    #[error("order {order_id} changed concurrently (expected stage '{expected}')")]
    Conflict { order_id: i64, expected: String },

    #[error("payment already recorded for order {0}")]
    PaymentExists(i64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl OrderError {
    pub(crate) fn order_not_found(order_id: i64) -> Self {
        OrderError::NotFound {
            entity: "order",
            id: order_id,
        }
    }

    pub(crate) fn payment_not_found(order_id: i64) -> Self {
        OrderError::NotFound {
            entity: "payment for order",
            id: order_id,
        }
    }

    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::NotFound { .. } => "not_found",
            OrderError::NotEligible { .. } => "not_eligible",
            OrderError::AlreadyDeleted(_) => "already_deleted",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::InvalidArgument(_) => "invalid_argument",
            OrderError::Conflict { .. } => "conflict",
            OrderError::PaymentExists(_) => "payment_exists",
            OrderError::Database(_) | OrderError::LockPoisoned => "storage",
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for OrderError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        OrderError::LockPoisoned
    }
}
