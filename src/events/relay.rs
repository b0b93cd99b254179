//! Outbox delivery worker
//!
//! A single background task drains the outbox: poll rows whose retry time
//! has come, push each through the sink, mark delivered or reschedule with
//! exponential backoff. A row that exhausts its attempts is parked as dead
//! and left in the table for inspection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{outbox, OutboxRow, SettlementDb};
use crate::error::{EngineError, Result};

/// Delivers domain events to a downstream consumer
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<()>;
}

/// Tuning for [`EventRelay`]
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the outbox is polled for due rows
    pub poll_interval: Duration,
    /// Rows fetched per poll
    pub batch_size: u32,
    /// First retry delay, doubled on every failed attempt
    pub backoff_base: Duration,
    /// Ceiling on the computed backoff
    pub backoff_cap: Duration,
    /// Attempts before a row is parked as dead
    pub max_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            poll_interval: Duration::from_secs(5),
            batch_size: 32,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            max_attempts: 8,
        }
    }
}

/// Background worker that pushes outbox rows to the sink
pub struct EventRelay {
    db: Arc<SettlementDb>,
    sink: Arc<dyn EventSink>,
    config: RelayConfig,
}

impl EventRelay {
    pub fn new(db: Arc<SettlementDb>, sink: Arc<dyn EventSink>, config: RelayConfig) -> Self {
        Self { db, sink, config }
    }

    /// Spawn the polling loop
    pub fn spawn(self) -> JoinHandle<()> {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "Event relay started"
        );
        tokio::spawn(async move {
            loop {
                match self.process_due().await {
                    Ok(0) => {}
                    Ok(n) => debug!(delivered_or_retried = n, "Relay pass complete"),
                    Err(e) => error!(error = %e, "Relay pass failed"),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
    }

    /// One delivery pass over the due rows; returns how many were handled
    ///
    /// Exposed separately so tests can drive the relay without the loop.
    pub async fn process_due(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let batch = self
            .db
            .with_conn(|conn| outbox::due_events(conn, &now, self.config.batch_size))?;

        let mut handled = 0;
        for row in batch {
            self.deliver_row(&row).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn deliver_row(&self, row: &OutboxRow) -> Result<()> {
        // A payload that no longer parses can never be delivered; park it as
        // dead right away so it stops blocking the head of the queue
        let payload: Value = match serde_json::from_str(&row.payload_json) {
            Ok(v) => v,
            Err(e) => {
                error!(
                    event_id = %row.id,
                    event_type = %row.event_type,
                    error = %e,
                    "Corrupt outbox payload, dead-lettered"
                );
                let now = Utc::now().to_rfc3339();
                self.db.with_conn(|conn| {
                    outbox::mark_failed(
                        conn,
                        &row.id,
                        &format!("corrupt payload: {}", e),
                        &now,
                        true,
                    )
                })?;
                return Ok(());
            }
        };

        match self.sink.deliver(&row.event_type, &payload).await {
            Ok(()) => {
                let now = Utc::now().to_rfc3339();
                self.db
                    .with_conn(|conn| outbox::mark_delivered(conn, &row.id, &now))?;
                debug!(event_id = %row.id, event_type = %row.event_type, "Event delivered");
            }
            Err(e) => {
                // attempts on the row counts completed failures; this one
                // becomes attempts + 1 after mark_failed
                let failed_attempts = (row.attempts as u32) + 1;
                let dead = failed_attempts >= self.config.max_attempts;
                let next_at = Utc::now() + self.backoff_after(failed_attempts);

                self.db.with_conn(|conn| {
                    outbox::mark_failed(
                        conn,
                        &row.id,
                        &e.to_string(),
                        &next_at.to_rfc3339(),
                        dead,
                    )
                })?;

                if dead {
                    error!(
                        event_id = %row.id,
                        event_type = %row.event_type,
                        attempts = failed_attempts,
                        error = %e,
                        "Event dead-lettered"
                    );
                } else {
                    warn!(
                        event_id = %row.id,
                        event_type = %row.event_type,
                        attempts = failed_attempts,
                        retry_at = %next_at.to_rfc3339(),
                        error = %e,
                        "Event delivery failed, rescheduled"
                    );
                }
            }
        }
        Ok(())
    }

    /// base * 2^(attempts-1), capped, plus up to one second of jitter
    fn backoff_after(&self, failed_attempts: u32) -> chrono::Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        let raw = self.config.backoff_base.as_millis() as u64 * (1u64 << exp);
        let capped = raw.min(self.config.backoff_cap.as_millis() as u64);
        let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), 0..1000);
        chrono::Duration::milliseconds((capped + jitter) as i64)
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Sink that posts events to an HTTP consumer: `POST {url}`
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({
                "type": event_type,
                "payload": payload,
            }))
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("event webhook request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::Internal(format!("event webhook status: {}", e)))?;
        Ok(())
    }
}

/// Sink that writes events to the log (dev mode without a consumer)
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<()> {
        info!(event_type = %event_type, payload = %payload, "Event (logged only)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvent;
    use std::sync::Mutex;

    /// Sink that records deliveries and fails the first `fail_first` calls
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        failures_left: Mutex<u32>,
    }

    impl RecordingSink {
        fn new(fail_first: u32) -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                failures_left: Mutex::new(fail_first),
            }
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, event_type: &str, _payload: &Value) -> Result<()> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(EngineError::Internal("sink down".into()));
            }
            self.delivered.lock().unwrap().push(event_type.to_string());
            Ok(())
        }
    }

    fn relay_with(
        db: Arc<SettlementDb>,
        sink: Arc<RecordingSink>,
        max_attempts: u32,
    ) -> EventRelay {
        EventRelay::new(
            db,
            sink,
            RelayConfig {
                backoff_base: Duration::from_millis(0),
                max_attempts,
                ..Default::default()
            },
        )
    }

    fn append_event(db: &SettlementDb) -> String {
        db.with_conn(|conn| {
            outbox::append(
                conn,
                &DomainEvent::BurnExecuted {
                    tx_hash: "0xT".into(),
                    burn_tx_hash: "0xB".into(),
                    amount_tokens: 5.0,
                },
                &Utc::now().to_rfc3339(),
            )
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_relay_delivers_pending() {
        let db = Arc::new(SettlementDb::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new(0));
        let id = append_event(&db);

        let relay = relay_with(db.clone(), sink.clone(), 8);
        let handled = relay.process_due().await.unwrap();
        assert_eq!(handled, 1);
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["burn.executed"]);

        let row = db
            .with_conn(|conn| outbox::get_event(conn, &id))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "delivered");
    }

    #[tokio::test]
    async fn test_relay_retries_then_delivers() {
        let db = Arc::new(SettlementDb::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new(1));
        let id = append_event(&db);

        let relay = relay_with(db.clone(), sink.clone(), 8);

        // First pass fails and reschedules
        relay.process_due().await.unwrap();
        let row = db
            .with_conn(|conn| outbox::get_event(conn, &id))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.attempts, 1);
        assert!(row.last_error.is_some());

        // Jitter pushes next_attempt_at up to a second out; wait past it
        tokio::time::sleep(Duration::from_millis(1100)).await;
        relay.process_due().await.unwrap();
        let row = db
            .with_conn(|conn| outbox::get_event(conn, &id))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "delivered");
    }

    #[tokio::test]
    async fn test_relay_dead_letters_after_max_attempts() {
        let db = Arc::new(SettlementDb::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new(u32::MAX));
        let id = append_event(&db);

        let relay = relay_with(db.clone(), sink.clone(), 2);

        relay.process_due().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        relay.process_due().await.unwrap();

        let row = db
            .with_conn(|conn| outbox::get_event(conn, &id))
            .unwrap()
            .unwrap();
        assert_eq!(row.status, "dead");
        assert_eq!(row.attempts, 2);
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_payload_dead_lettered_without_blocking_queue() {
        let db = Arc::new(SettlementDb::open_in_memory().unwrap());
        let sink = Arc::new(RecordingSink::new(0));

        // Hand-written row with unparseable JSON, dated before the valid
        // event so it sits at the head of the due batch
        let corrupt_id = "corrupt-row";
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO outbox_events (id, event_type, payload_json, status, attempts, next_attempt_at, created_at)
                 VALUES (?1, 'burn.executed', 'not json', 'pending', 0, ?2, ?2)",
                rusqlite::params![corrupt_id, "2020-01-01T00:00:00+00:00"],
            )?;
            Ok(())
        })
        .unwrap();
        let valid_id = append_event(&db);

        let relay = relay_with(db.clone(), sink.clone(), 8);
        relay.process_due().await.unwrap();

        // The event behind the corrupt row still goes out
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["burn.executed"]);
        let valid = db
            .with_conn(|conn| outbox::get_event(conn, &valid_id))
            .unwrap()
            .unwrap();
        assert_eq!(valid.status, "delivered");

        // The corrupt row is parked, not retried forever
        let corrupt = db
            .with_conn(|conn| outbox::get_event(conn, corrupt_id))
            .unwrap()
            .unwrap();
        assert_eq!(corrupt.status, "dead");
        assert!(corrupt
            .last_error
            .as_deref()
            .unwrap()
            .contains("corrupt payload"));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let db = Arc::new(SettlementDb::open_in_memory().unwrap());
        let relay = EventRelay::new(
            db,
            Arc::new(LogSink),
            RelayConfig {
                backoff_base: Duration::from_secs(2),
                backoff_cap: Duration::from_secs(300),
                ..Default::default()
            },
        );

        // Jitter adds up to 1s on top of the deterministic part
        let b1 = relay.backoff_after(1).num_milliseconds();
        let b3 = relay.backoff_after(3).num_milliseconds();
        let b20 = relay.backoff_after(20).num_milliseconds();
        assert!((2000..3000).contains(&b1));
        assert!((8000..9000).contains(&b3));
        assert!((300_000..301_000).contains(&b20));
    }
}
