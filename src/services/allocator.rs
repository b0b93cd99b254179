//! Allocator bridge for on-chain cash-outs
//!
//! When a profitable cycle settles, each investor's payout can be realized
//! on chain by swapping part of their staked token balance back to the
//! source currency. The bridge call is tolerated-failure: settlement math
//! and persistence never depend on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// One investor's cash-out order
#[derive(Debug, Clone, Serialize)]
pub struct CashOutRequest {
    pub investor_id: String,
    pub cycle_id: String,
    /// Payout being realized, in source currency
    #[serde(rename = "amountUsdt")]
    pub amount_usdt: f64,
    /// Staked tokens to swap back, capped at the investor's active stake
    #[serde(rename = "dctToSwap")]
    pub dct_to_swap: f64,
}

/// Bridge acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct CashOutReceipt {
    /// Hash of the chain transaction, if the bridge reported one
    #[serde(rename = "tonTxHash")]
    pub ton_tx_hash: Option<String>,
}

/// Executes cash-out swaps on the allocator chain
#[async_trait]
pub trait AllocatorBridge: Send + Sync {
    async fn cash_out(&self, req: &CashOutRequest) -> Result<CashOutReceipt>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Bridge behind an HTTP allocator service: `POST {base}/cash-out`
pub struct HttpAllocatorBridge {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAllocatorBridge {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AllocatorBridge for HttpAllocatorBridge {
    async fn cash_out(&self, req: &CashOutRequest) -> Result<CashOutReceipt> {
        let url = format!("{}/cash-out", self.base_url.trim_end_matches('/'));

        let receipt: CashOutReceipt = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("allocator request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::Internal(format!("allocator status: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::Internal(format!("allocator body: {}", e)))?;

        Ok(receipt)
    }
}
