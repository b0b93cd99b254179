//! Burn webhook
//!
//! The burn bucket of every payment is swapped into tokens and then
//! destroyed by an external burner. The webhook must hand back the burn
//! transaction hash; a payment without a confirmed burn receipt is aborted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};

/// Proof the burner executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnReceipt {
    /// On-chain hash of the burn transaction
    pub tx_hash: String,
}

/// Destroys a token amount and returns the receipt
#[async_trait]
pub trait BurnWebhook: Send + Sync {
    /// `context` ties the burn back to the payment that funded it
    async fn trigger(&self, amount_tokens: f64, context: &str) -> Result<BurnReceipt>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct BurnCall<'a> {
    amount: f64,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct BurnResponse {
    #[serde(alias = "txHash")]
    tx_hash: String,
}

/// Burner behind an HTTP webhook: `POST {url}`
pub struct HttpBurnWebhook {
    client: reqwest::Client,
    url: String,
}

impl HttpBurnWebhook {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BurnWebhook for HttpBurnWebhook {
    async fn trigger(&self, amount_tokens: f64, context: &str) -> Result<BurnReceipt> {
        let response: BurnResponse = self
            .client
            .post(&self.url)
            .json(&BurnCall {
                amount: amount_tokens,
                context,
            })
            .send()
            .await
            .map_err(|e| EngineError::BurnTrigger(format!("burn webhook request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::BurnTrigger(format!("burn webhook status: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::BurnTrigger(format!("burn webhook body: {}", e)))?;

        if response.tx_hash.is_empty() {
            return Err(EngineError::BurnTrigger(
                "burn webhook returned an empty tx hash".to_string(),
            ));
        }

        Ok(BurnReceipt {
            tx_hash: response.tx_hash,
        })
    }
}

// ============================================================================
// Logging implementation (dev mode only)
// ============================================================================

/// Burner that logs instead of burning and fabricates a receipt hash
pub struct LogBurnWebhook;

#[async_trait]
impl BurnWebhook for LogBurnWebhook {
    async fn trigger(&self, amount_tokens: f64, context: &str) -> Result<BurnReceipt> {
        let mut raw = [0u8; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut raw);
        let tx_hash = format!("devburn-{}", hex::encode(raw));

        info!(
            amount_tokens = amount_tokens,
            context = %context,
            tx_hash = %tx_hash,
            "Dev burn executed (logged only)"
        );
        Ok(BurnReceipt { tx_hash })
    }
}
