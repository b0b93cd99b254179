//! Price oracle client
//!
//! Supplies the token price snapshots every swap is quoted against. The swap
//! path rejects stale or non-positive prices, so the oracle only has to
//! report what it saw and when.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A single observed price for a token symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Feed-assigned identifier, recorded on receipts for audit
    pub id: String,
    pub symbol: String,
    /// Quote currency units per token
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

/// Source of price snapshots
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch the most recent snapshot for a symbol
    async fn latest(&self, symbol: &str) -> Result<PriceSnapshot>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Wire format of the price feed: `GET {base}/price/{symbol}`
#[derive(Debug, Deserialize)]
struct OracleQuote {
    #[serde(default)]
    id: Option<String>,
    price: f64,
    /// Feeds that omit the timestamp are treated as live
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

/// Oracle backed by an HTTP price feed
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn latest(&self, symbol: &str) -> Result<PriceSnapshot> {
        let url = format!("{}/price/{}", self.base_url.trim_end_matches('/'), symbol);

        let quote: OracleQuote = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::SwapExecution(format!("price oracle request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::SwapExecution(format!("price oracle status: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::SwapExecution(format!("price oracle body: {}", e)))?;

        Ok(PriceSnapshot {
            id: quote.id.unwrap_or_else(|| "unidentified".to_string()),
            symbol: symbol.to_string(),
            price: quote.price,
            observed_at: quote.observed_at.unwrap_or_else(Utc::now),
        })
    }
}

// ============================================================================
// Fixed-price implementation (dev mode and tests)
// ============================================================================

/// Oracle that always answers with one configured price, timestamped now
pub struct FixedPriceOracle {
    price: f64,
}

impl FixedPriceOracle {
    pub fn new(price: f64) -> Self {
        Self { price }
    }
}

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn latest(&self, symbol: &str) -> Result<PriceSnapshot> {
        Ok(PriceSnapshot {
            id: "fixed".to_string(),
            symbol: symbol.to_string(),
            price: self.price,
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_oracle_answers_any_symbol() {
        let oracle = FixedPriceOracle::new(2.0);
        let snap = oracle.latest("DCT").await.unwrap();
        assert_eq!(snap.price, 2.0);
        assert_eq!(snap.symbol, "DCT");
        assert_eq!(snap.id, "fixed");
    }
}
