//! Ledger schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{EngineError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the ledger schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating ledger schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| {
        EngineError::Persistence(format!("Failed to create schema_version table: {}", e))
    })?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| {
            EngineError::Persistence(format!("Failed to read schema version: {}", e))
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| EngineError::Persistence(format!("Failed to create users table: {}", e)))?;

    conn.execute_batch(SUBSCRIPTIONS_SCHEMA).map_err(|e| {
        EngineError::Persistence(format!("Failed to create subscription tables: {}", e))
    })?;

    conn.execute_batch(CYCLES_SCHEMA)
        .map_err(|e| EngineError::Persistence(format!("Failed to create cycle tables: {}", e)))?;

    conn.execute_batch(OUTBOX_SCHEMA)
        .map_err(|e| EngineError::Persistence(format!("Failed to create outbox table: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| EngineError::Persistence(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from an older version
///
/// No incremental steps exist yet; the version row is simply bumped.
fn migrate_schema(conn: &Connection, _from_version: i32) -> Result<()> {
    set_schema_version(conn, SCHEMA_VERSION)
}

/// Investor identities, keyed by wallet address
const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    wallet_address TEXT NOT NULL UNIQUE,
    chat_id TEXT,
    domain_alias TEXT,
    metadata_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Settled payments and the stakes they created.
/// tx_hash is the idempotency key for the whole payment flow.
const SUBSCRIPTIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    plan TEXT NOT NULL,
    tx_hash TEXT NOT NULL UNIQUE,
    gross_amount REAL NOT NULL,
    operations_amount REAL NOT NULL,
    auto_invest_amount REAL NOT NULL,
    burn_amount REAL NOT NULL,
    auto_invest_tokens REAL NOT NULL DEFAULT 0,
    burn_tokens REAL NOT NULL DEFAULT 0,
    price_used REAL,
    price_snapshot_id TEXT,
    auto_invest_swap_ref TEXT,
    burn_swap_ref TEXT,
    burn_tx_hash TEXT,
    operations_pct REAL NOT NULL,
    auto_invest_pct REAL NOT NULL,
    burn_pct REAL NOT NULL,
    verification_json TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS stakes (
    id TEXT PRIMARY KEY NOT NULL,
    subscription_id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    amount_tokens REAL NOT NULL,
    multiplier REAL NOT NULL,
    weight REAL NOT NULL,
    lock_months INTEGER,
    locked_until TEXT,
    early_exit_penalty REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'released', 'exited')),
    created_at TEXT NOT NULL,
    FOREIGN KEY (subscription_id) REFERENCES subscriptions(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Fund cycles and their contribution ledger.
/// The partial unique index enforces at most one active cycle.
const CYCLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fund_cycles (
    id TEXT PRIMARY KEY NOT NULL,
    cycle_number INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'settled')),
    opened_at TEXT NOT NULL,
    settled_at TEXT,
    profit REAL,
    notes TEXT,
    settlement_json TEXT
);

CREATE TABLE IF NOT EXISTS deposits (
    id TEXT PRIMARY KEY NOT NULL,
    cycle_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    amount REAL NOT NULL,
    kind TEXT NOT NULL
        CHECK (kind IN ('initial', 'reinvestment', 'carryover')),
    created_at TEXT NOT NULL,
    FOREIGN KEY (cycle_id) REFERENCES fund_cycles(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Domain events written in the same transaction as the state they describe
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    id TEXT PRIMARY KEY NOT NULL,
    event_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'delivered', 'dead')),
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    delivered_at TEXT
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_fund_cycles_single_active
    ON fund_cycles(status) WHERE status = 'active';

CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
CREATE INDEX IF NOT EXISTS idx_stakes_user_status ON stakes(user_id, status);
CREATE INDEX IF NOT EXISTS idx_deposits_cycle ON deposits(cycle_id);
CREATE INDEX IF NOT EXISTS idx_deposits_cycle_user ON deposits(cycle_id, user_id);
CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox_events(status, next_attempt_at);
"#;
