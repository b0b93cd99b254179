//! User identity operations
//!
//! Users are keyed by wallet address. Re-registration with the same wallet
//! merges identity fields instead of erroring, so every payment can carry
//! beneficiary info without a separate signup step.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// User row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub wallet_address: String,
    pub chat_id: Option<String>,
    pub domain_alias: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            wallet_address: row.get("wallet_address")?,
            chat_id: row.get("chat_id")?,
            domain_alias: row.get("domain_alias")?,
            metadata_json: row.get("metadata_json")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Identity fields carried on a payment or deposit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertUser {
    pub wallet_address: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub domain_alias: Option<String>,
    #[serde(default)]
    pub metadata_json: Option<String>,
}

/// Insert or merge a user by wallet address
///
/// Provided fields overwrite, absent fields keep their stored value.
pub fn upsert_user(conn: &Connection, input: &UpsertUser) -> Result<UserRow> {
    let now = Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO users (id, wallet_address, chat_id, domain_alias, metadata_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(wallet_address) DO UPDATE SET
             chat_id = COALESCE(excluded.chat_id, users.chat_id),
             domain_alias = COALESCE(excluded.domain_alias, users.domain_alias),
             metadata_json = COALESCE(excluded.metadata_json, users.metadata_json),
             updated_at = excluded.updated_at",
        params![
            id,
            input.wallet_address,
            input.chat_id,
            input.domain_alias,
            input.metadata_json,
            now,
        ],
    )?;

    // The insert id loses to an existing row on conflict, so read back
    get_by_wallet(conn, &input.wallet_address)?.ok_or_else(|| {
        crate::error::EngineError::Internal(format!(
            "User {} missing after upsert",
            input.wallet_address
        ))
    })
}

/// Look up a user by wallet address
pub fn get_by_wallet(conn: &Connection, wallet_address: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE wallet_address = ?")?;
    let mut rows = stmt.query(params![wallet_address])?;

    match rows.next()? {
        Some(row) => Ok(Some(UserRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Look up a user by id
pub fn get_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(UserRow::from_row(row)?)),
        None => Ok(None),
    }
}
