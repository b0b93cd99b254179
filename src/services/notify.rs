//! Investor notification channel
//!
//! Settlement summaries are pushed to investors after a cycle closes.
//! Delivery is best effort: a failed send is logged and never unwinds the
//! settlement that triggered it.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, Result};

/// Sends human-readable messages to an investor's chat
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct NotifyCall<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Channel behind an HTTP relay: `POST {url}`
pub struct HttpNotificationChannel {
    client: reqwest::Client,
    url: String,
}

impl HttpNotificationChannel {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for HttpNotificationChannel {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&NotifyCall { chat_id, text })
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("notify request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::Internal(format!("notify status: {}", e)))?;
        Ok(())
    }
}

// ============================================================================
// Logging implementation (dev mode only)
// ============================================================================

/// Channel that writes notifications to the log instead of sending them
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        info!(chat_id = %chat_id, text = %text, "Notification (logged only)");
        Ok(())
    }
}
