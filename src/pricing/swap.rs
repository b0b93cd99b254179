//! Swap execution against oracle prices
//!
//! A swap converts a source-currency amount into tokens at the latest
//! oracle price. The quote path fails closed: stale snapshots and
//! non-positive prices abort the swap rather than convert at a junk rate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::pricing::round9;
use crate::services::oracle::PriceOracle;

/// Which bucket a swap is executed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapTag {
    AutoInvest,
    Burn,
}

impl SwapTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapTag::AutoInvest => "auto_invest",
            SwapTag::Burn => "burn",
        }
    }
}

/// One conversion order
#[derive(Debug, Clone)]
pub struct SwapRequest {
    /// Source-currency amount to convert
    pub amount: f64,
    pub tag: SwapTag,
}

/// Result of a conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapOutcome {
    /// Source amount actually converted, after the base rate
    pub source_amount: f64,
    /// Tokens received
    pub target_amount: f64,
    /// Price the conversion was quoted at, 0 for a no-op swap
    pub price_used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Synthetic reference identifying this swap in receipts and logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
}

impl SwapOutcome {
    /// Outcome for a swap that had nothing to convert
    pub fn zero() -> Self {
        SwapOutcome {
            source_amount: 0.0,
            target_amount: 0.0,
            price_used: 0.0,
            snapshot_id: None,
            tx_ref: None,
        }
    }
}

/// Executes conversion orders
#[async_trait]
pub trait SwapRouter: Send + Sync {
    async fn execute(&self, req: &SwapRequest) -> Result<SwapOutcome>;
}

/// Tuning for [`SwapExecutor`]
#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Token symbol quoted against the oracle
    pub symbol: String,
    /// Multiplier applied to the source amount before conversion
    pub base_rate: f64,
    /// Oldest snapshot the executor will quote against
    pub max_snapshot_age: Duration,
    /// Pin the price instead of consulting the oracle
    pub price_override: Option<f64>,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            symbol: "DCT".to_string(),
            base_rate: 1.0,
            max_snapshot_age: Duration::from_secs(600),
            price_override: None,
        }
    }
}

/// Oracle-quoted swap executor
pub struct SwapExecutor {
    config: SwapConfig,
    oracle: Arc<dyn PriceOracle>,
}

impl SwapExecutor {
    pub fn new(config: SwapConfig, oracle: Arc<dyn PriceOracle>) -> Self {
        Self { config, oracle }
    }

    /// Resolve the quote price: override if pinned, otherwise a fresh
    /// oracle snapshot checked for staleness
    async fn quote_price(&self) -> Result<(f64, Option<String>)> {
        if let Some(price) = self.config.price_override {
            return Ok((price, None));
        }

        let snapshot = self.oracle.latest(&self.config.symbol).await?;
        let age = Utc::now().signed_duration_since(snapshot.observed_at);
        let max_age = chrono::Duration::from_std(self.config.max_snapshot_age)
            .map_err(|e| EngineError::Config(format!("max snapshot age: {}", e)))?;
        if age > max_age {
            return Err(EngineError::SwapExecution(format!(
                "price snapshot {} for {} is stale ({}s old, limit {}s)",
                snapshot.id,
                snapshot.symbol,
                age.num_seconds(),
                max_age.num_seconds()
            )));
        }
        Ok((snapshot.price, Some(snapshot.id)))
    }
}

#[async_trait]
impl SwapRouter for SwapExecutor {
    async fn execute(&self, req: &SwapRequest) -> Result<SwapOutcome> {
        if !req.amount.is_finite() {
            return Err(EngineError::SwapExecution(format!(
                "swap amount {} is not a number",
                req.amount
            )));
        }
        if req.amount <= 0.0 {
            debug!(tag = req.tag.as_str(), "Skipping swap for non-positive amount");
            return Ok(SwapOutcome::zero());
        }

        let (price, snapshot_id) = self.quote_price().await?;
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::SwapExecution(format!(
                "refusing to swap at non-positive price {}",
                price
            )));
        }

        let source_amount = round9(req.amount * self.config.base_rate);
        let target_amount = round9(source_amount / price);

        let mut raw = [0u8; 6];
        rand::thread_rng().fill(&mut raw);
        let tx_ref = format!("swap-{}-{}", req.tag.as_str(), hex::encode(raw));

        info!(
            tag = req.tag.as_str(),
            source_amount = source_amount,
            target_amount = target_amount,
            price = price,
            tx_ref = %tx_ref,
            "Swap executed"
        );

        Ok(SwapOutcome {
            source_amount,
            target_amount,
            price_used: price,
            snapshot_id,
            tx_ref: Some(tx_ref),
        })
    }
}
