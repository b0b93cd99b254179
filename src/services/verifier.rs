//! Inbound payment verification
//!
//! Before any money is split or swapped, the claimed deposit transaction is
//! checked against the source ledger: does it exist, did it pay the expected
//! address, does the amount cover the subscription. The full outcome is kept
//! as evidence on the subscription row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// What to verify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Transaction hash the payer claims to have sent
    pub tx_ref: String,
    /// Deposit address the payment must have credited, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_address: Option<String>,
    /// Gross amount the subscription requires, in source currency
    pub expected_amount: f64,
}

/// Verdict from the source ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checks claimed payments against the source ledger
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, req: &VerificationRequest) -> Result<VerificationOutcome>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Verifier backed by an HTTP ledger-scanning service: `POST {base}/verify`
pub struct HttpPaymentVerifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentVerifier {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentVerifier for HttpPaymentVerifier {
    async fn verify(&self, req: &VerificationRequest) -> Result<VerificationOutcome> {
        let url = format!("{}/verify", self.base_url.trim_end_matches('/'));

        let outcome: VerificationOutcome = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| EngineError::PaymentVerification(format!("verifier request: {}", e)))?
            .error_for_status()
            .map_err(|e| EngineError::PaymentVerification(format!("verifier status: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::PaymentVerification(format!("verifier body: {}", e)))?;

        Ok(outcome)
    }
}

// ============================================================================
// Accept-all implementation (dev mode only)
// ============================================================================

/// Verifier that approves everything, echoing the expected amount back
///
/// Only wired up in dev mode; startup refuses to run without a real
/// verifier otherwise.
pub struct AcceptAllVerifier;

#[async_trait]
impl PaymentVerifier for AcceptAllVerifier {
    async fn verify(&self, req: &VerificationRequest) -> Result<VerificationOutcome> {
        Ok(VerificationOutcome {
            ok: true,
            amount_received: Some(req.expected_amount),
            block_time: Some(Utc::now()),
            error: None,
        })
    }
}
