//! Subscription and stake persistence
//!
//! A settled payment lands as one transaction: user upsert, subscription
//! row, optional stake row and the outbox events describing what happened.
//! Either all of it commits or none of it does, and the unique tx_hash
//! makes the whole flow idempotent per payment.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::users::{self, UpsertUser};
use crate::db::outbox;
use crate::error::{EngineError, Result};
use crate::events::DomainEvent;

/// Subscription row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub id: String,
    pub user_id: String,
    pub plan: String,
    pub tx_hash: String,
    pub gross_amount: f64,
    pub operations_amount: f64,
    pub auto_invest_amount: f64,
    pub burn_amount: f64,
    pub auto_invest_tokens: f64,
    pub burn_tokens: f64,
    pub price_used: Option<f64>,
    pub price_snapshot_id: Option<String>,
    pub auto_invest_swap_ref: Option<String>,
    pub burn_swap_ref: Option<String>,
    pub burn_tx_hash: Option<String>,
    pub operations_pct: f64,
    pub auto_invest_pct: f64,
    pub burn_pct: f64,
    pub verification_json: Option<String>,
    pub created_at: String,
}

impl SubscriptionRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            plan: row.get("plan")?,
            tx_hash: row.get("tx_hash")?,
            gross_amount: row.get("gross_amount")?,
            operations_amount: row.get("operations_amount")?,
            auto_invest_amount: row.get("auto_invest_amount")?,
            burn_amount: row.get("burn_amount")?,
            auto_invest_tokens: row.get("auto_invest_tokens")?,
            burn_tokens: row.get("burn_tokens")?,
            price_used: row.get("price_used")?,
            price_snapshot_id: row.get("price_snapshot_id")?,
            auto_invest_swap_ref: row.get("auto_invest_swap_ref")?,
            burn_swap_ref: row.get("burn_swap_ref")?,
            burn_tx_hash: row.get("burn_tx_hash")?,
            operations_pct: row.get("operations_pct")?,
            auto_invest_pct: row.get("auto_invest_pct")?,
            burn_pct: row.get("burn_pct")?,
            verification_json: row.get("verification_json")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Stake row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRow {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub amount_tokens: f64,
    pub multiplier: f64,
    pub weight: f64,
    pub lock_months: Option<u32>,
    pub locked_until: Option<String>,
    pub early_exit_penalty: f64,
    pub status: String,
    pub created_at: String,
}

impl StakeRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            subscription_id: row.get("subscription_id")?,
            user_id: row.get("user_id")?,
            amount_tokens: row.get("amount_tokens")?,
            multiplier: row.get("multiplier")?,
            weight: row.get("weight")?,
            lock_months: row.get("lock_months")?,
            locked_until: row.get("locked_until")?,
            early_exit_penalty: row.get("early_exit_penalty")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Stake to create alongside a subscription
#[derive(Debug, Clone)]
pub struct NewStake {
    pub id: String,
    pub amount_tokens: f64,
    pub multiplier: f64,
    pub weight: f64,
    pub lock_months: Option<u32>,
    pub locked_until: Option<String>,
    pub early_exit_penalty: f64,
}

/// Everything a settled payment writes, ids pre-generated by the caller
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: String,
    pub beneficiary: UpsertUser,
    pub plan: String,
    pub tx_hash: String,
    pub gross_amount: f64,
    pub operations_amount: f64,
    pub auto_invest_amount: f64,
    pub burn_amount: f64,
    pub auto_invest_tokens: f64,
    pub burn_tokens: f64,
    pub price_used: Option<f64>,
    pub price_snapshot_id: Option<String>,
    pub auto_invest_swap_ref: Option<String>,
    pub burn_swap_ref: Option<String>,
    pub burn_tx_hash: Option<String>,
    pub operations_pct: f64,
    pub auto_invest_pct: f64,
    pub burn_pct: f64,
    pub verification_json: Option<String>,
    pub created_at: String,
    pub stake: Option<NewStake>,
    pub events: Vec<DomainEvent>,
}

/// Ids of the rows a payment created
#[derive(Debug, Clone, Serialize)]
pub struct RecordedPayment {
    pub user_id: String,
    pub subscription_id: String,
    pub stake_id: Option<String>,
}

/// Persist a settled payment atomically
///
/// Rolls back everything on a duplicate tx_hash, so a replayed payment
/// leaves no trace beyond the original rows.
pub fn record_settled_payment(
    conn: &mut Connection,
    rec: &NewSubscription,
) -> Result<RecordedPayment> {
    let tx = conn.transaction()?;

    let user = users::upsert_user(&tx, &rec.beneficiary)?;

    if find_by_tx_hash(&tx, &rec.tx_hash)?.is_some() {
        return Err(EngineError::DuplicateSubscription {
            tx_hash: rec.tx_hash.clone(),
        });
    }

    tx.execute(
        "INSERT INTO subscriptions (
             id, user_id, plan, tx_hash,
             gross_amount, operations_amount, auto_invest_amount, burn_amount,
             auto_invest_tokens, burn_tokens,
             price_used, price_snapshot_id, auto_invest_swap_ref, burn_swap_ref, burn_tx_hash,
             operations_pct, auto_invest_pct, burn_pct,
             verification_json, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            rec.id,
            user.id,
            rec.plan,
            rec.tx_hash,
            rec.gross_amount,
            rec.operations_amount,
            rec.auto_invest_amount,
            rec.burn_amount,
            rec.auto_invest_tokens,
            rec.burn_tokens,
            rec.price_used,
            rec.price_snapshot_id,
            rec.auto_invest_swap_ref,
            rec.burn_swap_ref,
            rec.burn_tx_hash,
            rec.operations_pct,
            rec.auto_invest_pct,
            rec.burn_pct,
            rec.verification_json,
            rec.created_at,
        ],
    )
    .map_err(|e| match e {
        // Backstop for concurrent inserts racing past the pre-check
        rusqlite::Error::SqliteFailure(f, Some(ref msg))
            if f.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("subscriptions.tx_hash") =>
        {
            EngineError::DuplicateSubscription {
                tx_hash: rec.tx_hash.clone(),
            }
        }
        other => EngineError::from(other),
    })?;

    let stake_id = match &rec.stake {
        Some(stake) => {
            tx.execute(
                "INSERT INTO stakes (
                     id, subscription_id, user_id, amount_tokens, multiplier, weight,
                     lock_months, locked_until, early_exit_penalty, status, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', ?10)",
                params![
                    stake.id,
                    rec.id,
                    user.id,
                    stake.amount_tokens,
                    stake.multiplier,
                    stake.weight,
                    stake.lock_months,
                    stake.locked_until,
                    stake.early_exit_penalty,
                    rec.created_at,
                ],
            )?;
            Some(stake.id.clone())
        }
        None => None,
    };

    for event in &rec.events {
        outbox::append(&tx, event, &rec.created_at)?;
    }

    tx.commit()?;

    debug!(
        subscription_id = %rec.id,
        tx_hash = %rec.tx_hash,
        "Recorded settled payment"
    );

    Ok(RecordedPayment {
        user_id: user.id,
        subscription_id: rec.id.clone(),
        stake_id,
    })
}

/// Look up a subscription by payment hash
pub fn find_by_tx_hash(conn: &Connection, tx_hash: &str) -> Result<Option<SubscriptionRow>> {
    let mut stmt = conn.prepare("SELECT * FROM subscriptions WHERE tx_hash = ?")?;
    let mut rows = stmt.query(params![tx_hash])?;

    match rows.next()? {
        Some(row) => Ok(Some(SubscriptionRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Look up a subscription by id
pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<SubscriptionRow>> {
    let mut stmt = conn.prepare("SELECT * FROM subscriptions WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(SubscriptionRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Count all subscriptions
pub fn count_subscriptions(conn: &Connection) -> Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))?;
    Ok(n)
}

/// Total actively staked tokens for a user
pub fn active_stake_total(conn: &Connection, user_id: &str) -> Result<f64> {
    let total = conn.query_row(
        "SELECT COALESCE(SUM(amount_tokens), 0) FROM stakes
         WHERE user_id = ? AND status = 'active'",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// All stakes for a user, newest first
pub fn stakes_for_user(conn: &Connection, user_id: &str) -> Result<Vec<StakeRow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM stakes WHERE user_id = ? ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| StakeRow::from_row(row))?;

    let mut stakes = Vec::new();
    for row in rows {
        stakes.push(row?);
    }
    Ok(stakes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SettlementDb;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_subscription(tx_hash: &str) -> NewSubscription {
        NewSubscription {
            id: Uuid::new_v4().to_string(),
            beneficiary: UpsertUser {
                wallet_address: "0xWALLET".into(),
                chat_id: Some("7".into()),
                ..Default::default()
            },
            plan: "standard".into(),
            tx_hash: tx_hash.into(),
            gross_amount: 100.0,
            operations_amount: 60.0,
            auto_invest_amount: 30.0,
            burn_amount: 10.0,
            auto_invest_tokens: 15.0,
            burn_tokens: 5.0,
            price_used: Some(2.0),
            price_snapshot_id: Some("snap-1".into()),
            auto_invest_swap_ref: Some("swap-auto_invest-aa".into()),
            burn_swap_ref: Some("swap-burn-bb".into()),
            burn_tx_hash: Some("burn-cc".into()),
            operations_pct: 60.0,
            auto_invest_pct: 30.0,
            burn_pct: 10.0,
            verification_json: None,
            created_at: Utc::now().to_rfc3339(),
            stake: Some(NewStake {
                id: Uuid::new_v4().to_string(),
                amount_tokens: 15.0,
                multiplier: 1.1,
                weight: 16.5,
                lock_months: Some(3),
                locked_until: None,
                early_exit_penalty: 0.05,
            }),
            events: vec![],
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let db = SettlementDb::open_in_memory().unwrap();
        let rec = sample_subscription("0xTX1");

        let recorded = db
            .with_conn_mut(|conn| record_settled_payment(conn, &rec))
            .unwrap();
        assert_eq!(recorded.subscription_id, rec.id);
        assert!(recorded.stake_id.is_some());

        let found = db
            .with_conn(|conn| find_by_tx_hash(conn, "0xTX1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.gross_amount, 100.0);
        assert_eq!(found.auto_invest_tokens, 15.0);
        assert_eq!(found.burn_tx_hash.as_deref(), Some("burn-cc"));

        let total = db
            .with_conn(|conn| active_stake_total(conn, &recorded.user_id))
            .unwrap();
        assert_eq!(total, 15.0);
    }

    #[test]
    fn test_duplicate_tx_hash_rolls_back() {
        let db = SettlementDb::open_in_memory().unwrap();

        db.with_conn_mut(|conn| record_settled_payment(conn, &sample_subscription("0xDUP")))
            .unwrap();

        let mut replay = sample_subscription("0xDUP");
        replay.gross_amount = 999.0;
        let err = db
            .with_conn_mut(|conn| record_settled_payment(conn, &replay))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DuplicateSubscription { ref tx_hash } if tx_hash == "0xDUP"
        ));

        // Count unchanged, original amounts intact, no second stake
        let count = db.with_conn(|conn| count_subscriptions(conn)).unwrap();
        assert_eq!(count, 1);
        let kept = db
            .with_conn(|conn| find_by_tx_hash(conn, "0xDUP"))
            .unwrap()
            .unwrap();
        assert_eq!(kept.gross_amount, 100.0);
    }

    #[test]
    fn test_subscription_without_stake() {
        let db = SettlementDb::open_in_memory().unwrap();
        let mut rec = sample_subscription("0xNOSTAKE");
        rec.stake = None;

        let recorded = db
            .with_conn_mut(|conn| record_settled_payment(conn, &rec))
            .unwrap();
        assert!(recorded.stake_id.is_none());

        let total = db
            .with_conn(|conn| active_stake_total(conn, &recorded.user_id))
            .unwrap();
        assert_eq!(total, 0.0);
    }
}
