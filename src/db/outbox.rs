//! Transactional event outbox
//!
//! Domain events are written in the same transaction as the ledger change
//! they describe, then delivered asynchronously by the relay worker. An
//! event is never visible to the outside world unless its transaction
//! committed.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::DomainEvent;

/// Delivery states of an outbox row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Dead => "dead",
        }
    }
}

/// Outbox row from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: String,
    pub event_type: String,
    pub payload_json: String,
    pub status: String,
    pub attempts: i64,
    pub next_attempt_at: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
}

impl OutboxRow {
    fn from_row(row: &Row) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            event_type: row.get("event_type")?,
            payload_json: row.get("payload_json")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            next_attempt_at: row.get("next_attempt_at")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            delivered_at: row.get("delivered_at")?,
        })
    }
}

/// Append an event, due immediately
///
/// Meant to be called on a transaction so the event commits with the
/// state change it describes.
pub fn append(conn: &Connection, event: &DomainEvent, now: &str) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let payload = serde_json::to_string(&event.payload())
        .map_err(|e| crate::error::EngineError::Internal(format!("Event payload: {}", e)))?;

    conn.execute(
        "INSERT INTO outbox_events (id, event_type, payload_json, status, attempts, next_attempt_at, created_at)
         VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)",
        params![id, event.event_type(), payload, now],
    )?;
    Ok(id)
}

/// Pending events whose retry time has come, oldest first
pub fn due_events(conn: &Connection, now: &str, limit: u32) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM outbox_events
         WHERE status = 'pending' AND next_attempt_at <= ?
         ORDER BY created_at, rowid
         LIMIT ?",
    )?;
    let rows = stmt.query_map(params![now, limit], |row| OutboxRow::from_row(row))?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Mark an event as delivered
pub fn mark_delivered(conn: &Connection, id: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE outbox_events SET status = 'delivered', delivered_at = ?2, last_error = NULL
         WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

/// Record a failed attempt and either reschedule or dead-letter
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    next_attempt_at: &str,
    dead: bool,
) -> Result<()> {
    let status = if dead {
        OutboxStatus::Dead
    } else {
        OutboxStatus::Pending
    };
    conn.execute(
        "UPDATE outbox_events
         SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3, status = ?4
         WHERE id = ?1",
        params![id, error, next_attempt_at, status.as_str()],
    )?;
    Ok(())
}

/// Look up one outbox row
pub fn get_event(conn: &Connection, id: &str) -> Result<Option<OutboxRow>> {
    let mut stmt = conn.prepare("SELECT * FROM outbox_events WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(OutboxRow::from_row(row)?)),
        None => Ok(None),
    }
}
