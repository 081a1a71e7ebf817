//! Customer accounts and profiles.
//!
//! Orders reference a `customer_profiles` row; the profile belongs to an
//! `accounts` row carrying the login email and role. Both are joined into the
//! order read views.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::db::DbState;
use crate::error::{OrderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Customer,
    Admin,
}

impl AccountRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountRole::Customer => "customer",
            AccountRole::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerProfile {
    pub id: i64,
    pub account_id: i64,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

pub fn create_account(db: &DbState, email: &str, role: AccountRole) -> Result<i64> {
    let email = email.trim();
    if email.is_empty() {
        return Err(OrderError::InvalidArgument("email is required".into()));
    }
    let conn = db.conn.lock()?;
    conn.execute(
        "INSERT INTO accounts (email, role) VALUES (?1, ?2)",
        params![email, role.as_str()],
    )?;
    let id = conn.last_insert_rowid();
    info!(account_id = id, role = role.as_str(), "Account created");
    Ok(id)
}

pub fn create_profile(
    db: &DbState,
    account_id: i64,
    full_name: &str,
    phone_number: Option<&str>,
    address: Option<&str>,
) -> Result<i64> {
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(OrderError::InvalidArgument("full name is required".into()));
    }
    let conn = db.conn.lock()?;
    let account_exists: Option<i64> = conn
        .query_row(
            "SELECT id FROM accounts WHERE id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?;
    if account_exists.is_none() {
        return Err(OrderError::InvalidArgument(format!(
            "account {account_id} does not exist"
        )));
    }
    conn.execute(
        "INSERT INTO customer_profiles (account_id, full_name, phone_number, address)
         VALUES (?1, ?2, ?3, ?4)",
        params![account_id, full_name, phone_number, address],
    )?;
    let id = conn.last_insert_rowid();
    info!(customer_id = id, account_id, "Customer profile created");
    Ok(id)
}

pub fn get_profile(db: &DbState, customer_id: i64) -> Result<Option<CustomerProfile>> {
    let conn = db.conn.lock()?;
    let profile = conn
        .query_row(
            "SELECT id, account_id, full_name, phone_number, address
             FROM customer_profiles WHERE id = ?1",
            params![customer_id],
            |row| {
                Ok(CustomerProfile {
                    id: row.get(0)?,
                    account_id: row.get(1)?,
                    full_name: row.get(2)?,
                    phone_number: row.get(3)?,
                    address: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(profile)
}

pub(crate) fn profile_exists(conn: &Connection, customer_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM customer_profiles WHERE id = ?1",
            params![customer_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Test fixture: one account + profile, returns the profile id.
#[cfg(test)]
pub(crate) fn seed_customer(db: &DbState, email: &str, name: &str) -> i64 {
    let account_id = create_account(db, email, AccountRole::Customer).expect("account");
    create_profile(db, account_id, name, Some("09171234567"), Some("12 Mabini St"))
        .expect("profile")
}
