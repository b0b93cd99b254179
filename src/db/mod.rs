//! SQLite ledger for the settlement engine
//!
//! All money movement the engine acknowledges lives here: users,
//! subscriptions with their split receipts, token stakes, fund cycles with
//! their deposits, and the outbox of domain events awaiting relay.
//!
//! ## Tables
//!
//! - `users` - investor identities keyed by wallet address
//! - `subscriptions` - one row per settled payment (tx_hash unique)
//! - `stakes` - locked token positions created by auto-invest
//! - `fund_cycles` - investment rounds, at most one active
//! - `deposits` - per-cycle contribution ledger
//! - `outbox_events` - domain events pending delivery

pub mod cycles;
pub mod outbox;
pub mod schema;
pub mod subscriptions;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// SQLite ledger handle
pub struct SettlementDb {
    conn: Mutex<Connection>,
}

impl SettlementDb {
    /// Open or create the ledger database
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("Opening settlement ledger at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Persistence(format!("Failed to open SQLite: {}", e)))?;

        // WAL keeps reads cheap while payments and settlements write
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| EngineError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory ledger (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory settlement ledger");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Persistence(format!("Failed to open SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Persistence(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write (or transaction) with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Ledger statistics for the health endpoint
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                users: count("SELECT COUNT(*) FROM users")?,
                subscriptions: count("SELECT COUNT(*) FROM subscriptions")?,
                active_stakes: count("SELECT COUNT(*) FROM stakes WHERE status = 'active'")?,
                cycles: count("SELECT COUNT(*) FROM fund_cycles")?,
                deposits: count("SELECT COUNT(*) FROM deposits")?,
                pending_events: count(
                    "SELECT COUNT(*) FROM outbox_events WHERE status = 'pending'",
                )?,
            })
        })
    }
}

/// Ledger statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub users: u64,
    pub subscriptions: u64,
    pub active_stakes: u64,
    pub cycles: u64,
    pub deposits: u64,
    pub pending_events: u64,
}

// Re-exports
pub use cycles::{CycleClosure, CycleRow, CycleStatus, DepositKind, DepositRow, InvestorBase, SeedDeposit};
pub use outbox::{OutboxRow, OutboxStatus};
pub use subscriptions::{NewStake, NewSubscription, RecordedPayment, StakeRow, SubscriptionRow};
pub use users::{UpsertUser, UserRow};
