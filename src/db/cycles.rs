//! Fund cycle and deposit operations
//!
//! Cycles are investment rounds. The ledger enforces at most one active
//! cycle via a partial unique index, and settlement closes the active cycle
//! and opens its successor in a single transaction so there is never a gap
//! or an overlap.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::outbox;
use crate::error::{EngineError, Result};
use crate::events::DomainEvent;

/// Cycle lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Active,
    Settled,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Active => "active",
            CycleStatus::Settled => "settled",
        }
    }
}

/// How a deposit entered the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositKind {
    /// Fresh capital recorded by an operator
    Initial,
    /// Profit share rolled into the next cycle at settlement
    Reinvestment,
    /// Remaining principal moved forward at settlement
    Carryover,
}

impl DepositKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositKind::Initial => "initial",
            DepositKind::Reinvestment => "reinvestment",
            DepositKind::Carryover => "carryover",
        }
    }
}

/// Cycle row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRow {
    pub id: String,
    pub cycle_number: i64,
    pub status: String,
    pub opened_at: String,
    pub settled_at: Option<String>,
    pub profit: Option<f64>,
    pub notes: Option<String>,
    pub settlement_json: Option<String>,
}

impl CycleRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            cycle_number: row.get("cycle_number")?,
            status: row.get("status")?,
            opened_at: row.get("opened_at")?,
            settled_at: row.get("settled_at")?,
            profit: row.get("profit")?,
            notes: row.get("notes")?,
            settlement_json: row.get("settlement_json")?,
        })
    }

    pub fn is_settled(&self) -> bool {
        self.status == CycleStatus::Settled.as_str()
    }
}

/// Deposit row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRow {
    pub id: String,
    pub cycle_id: String,
    pub user_id: String,
    pub amount: f64,
    pub kind: String,
    pub created_at: String,
}

impl DepositRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            cycle_id: row.get("cycle_id")?,
            user_id: row.get("user_id")?,
            amount: row.get("amount")?,
            kind: row.get("kind")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// One investor's summed contribution to a cycle
#[derive(Debug, Clone, Serialize)]
pub struct InvestorBase {
    pub user_id: String,
    pub wallet_address: String,
    pub chat_id: Option<String>,
    pub base: f64,
}

/// Deposit seeded into the successor cycle at settlement
#[derive(Debug, Clone)]
pub struct SeedDeposit {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub kind: DepositKind,
}

/// Everything settlement writes when it closes a cycle
#[derive(Debug, Clone)]
pub struct CycleClosure {
    pub cycle_id: String,
    pub settled_at: String,
    pub profit: f64,
    pub notes: Option<String>,
    pub settlement_json: String,
    pub next_cycle_id: String,
    pub next_opened_at: String,
    pub seeds: Vec<SeedDeposit>,
    pub events: Vec<DomainEvent>,
}

/// Open cycle #1
///
/// Only valid on an empty ledger; once settlement runs, successor cycles
/// are opened by [`settle_and_open_next`].
pub fn open_initial_cycle(conn: &mut Connection, now: &str) -> Result<CycleRow> {
    let tx = conn.transaction()?;

    let existing: i64 = tx.query_row("SELECT COUNT(*) FROM fund_cycles", [], |row| row.get(0))?;
    if existing > 0 {
        return Err(EngineError::BadRequest(
            "cycle ledger is already bootstrapped".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO fund_cycles (id, cycle_number, status, opened_at)
         VALUES (?1, 1, 'active', ?2)",
        params![id, now],
    )?;
    tx.commit()?;

    debug!(cycle_id = %id, "Opened initial fund cycle");
    get_cycle_required(conn, &id)
}

/// The currently open cycle, if any
pub fn get_active_cycle(conn: &Connection) -> Result<Option<CycleRow>> {
    let mut stmt = conn.prepare("SELECT * FROM fund_cycles WHERE status = 'active'")?;
    let mut rows = stmt.query([])?;

    match rows.next()? {
        Some(row) => Ok(Some(CycleRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Look up a cycle by id
pub fn get_cycle(conn: &Connection, id: &str) -> Result<Option<CycleRow>> {
    let mut stmt = conn.prepare("SELECT * FROM fund_cycles WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(CycleRow::from_row(row)?)),
        None => Ok(None),
    }
}

fn get_cycle_required(conn: &Connection, id: &str) -> Result<CycleRow> {
    get_cycle(conn, id)?
        .ok_or_else(|| EngineError::Internal(format!("Cycle {} missing after write", id)))
}

/// Record a deposit into a cycle
pub fn insert_deposit(
    conn: &Connection,
    cycle_id: &str,
    user_id: &str,
    amount: f64,
    kind: DepositKind,
    now: &str,
) -> Result<DepositRow> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO deposits (id, cycle_id, user_id, amount, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, cycle_id, user_id, amount, kind.as_str(), now],
    )?;

    let mut stmt = conn.prepare("SELECT * FROM deposits WHERE id = ?")?;
    let row = stmt.query_row(params![id], |row| DepositRow::from_row(row))?;
    Ok(row)
}

/// All deposits in a cycle, oldest first
pub fn deposits_for_cycle(conn: &Connection, cycle_id: &str) -> Result<Vec<DepositRow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM deposits WHERE cycle_id = ? ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![cycle_id], |row| DepositRow::from_row(row))?;

    let mut deposits = Vec::new();
    for row in rows {
        deposits.push(row?);
    }
    Ok(deposits)
}

/// Contribution bases per investor, joined with identity fields
pub fn investor_bases(conn: &Connection, cycle_id: &str) -> Result<Vec<InvestorBase>> {
    let mut stmt = conn.prepare(
        "SELECT d.user_id, u.wallet_address, u.chat_id, SUM(d.amount) AS base
         FROM deposits d
         JOIN users u ON u.id = d.user_id
         WHERE d.cycle_id = ?
         GROUP BY d.user_id
         ORDER BY u.wallet_address",
    )?;
    let rows = stmt.query_map(params![cycle_id], |row| {
        Ok(InvestorBase {
            user_id: row.get(0)?,
            wallet_address: row.get(1)?,
            chat_id: row.get(2)?,
            base: row.get(3)?,
        })
    })?;

    let mut bases = Vec::new();
    for row in rows {
        bases.push(row?);
    }
    Ok(bases)
}

/// Close a cycle and open its successor atomically
///
/// The status flip is a compare-and-set: if another settlement got there
/// first, zero rows match and the whole transaction unwinds with
/// [`EngineError::AlreadySettled`].
pub fn settle_and_open_next(conn: &mut Connection, closure: &CycleClosure) -> Result<CycleRow> {
    let tx = conn.transaction()?;

    let flipped = tx.execute(
        "UPDATE fund_cycles
         SET status = 'settled', settled_at = ?2, profit = ?3, notes = ?4, settlement_json = ?5
         WHERE id = ?1 AND status = 'active'",
        params![
            closure.cycle_id,
            closure.settled_at,
            closure.profit,
            closure.notes,
            closure.settlement_json,
        ],
    )?;
    if flipped == 0 {
        return Err(EngineError::AlreadySettled {
            cycle_id: closure.cycle_id.clone(),
        });
    }

    let next_number: i64 = tx.query_row(
        "SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM fund_cycles",
        [],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO fund_cycles (id, cycle_number, status, opened_at)
         VALUES (?1, ?2, 'active', ?3)",
        params![closure.next_cycle_id, next_number, closure.next_opened_at],
    )?;

    for seed in &closure.seeds {
        tx.execute(
            "INSERT INTO deposits (id, cycle_id, user_id, amount, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                seed.id,
                closure.next_cycle_id,
                seed.user_id,
                seed.amount,
                seed.kind.as_str(),
                closure.next_opened_at,
            ],
        )?;
    }

    for event in &closure.events {
        outbox::append(&tx, event, &closure.settled_at)?;
    }

    tx.commit()?;

    debug!(
        settled = %closure.cycle_id,
        opened = %closure.next_cycle_id,
        cycle_number = next_number,
        "Cycle settled, successor opened"
    );
    get_cycle_required(conn, &closure.next_cycle_id)
}
