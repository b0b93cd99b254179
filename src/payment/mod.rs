//! Payment orchestration
//!
//! One inbound payment runs the whole pipeline: verify the deposit on the
//! source ledger, split the gross across the three buckets, swap the
//! auto-invest and burn buckets into tokens, burn the burn bucket, then
//! persist user + subscription + stake + events in a single transaction.
//!
//! The two swaps are executed one after the other on purpose. Nothing is
//! persisted until every external step has succeeded, so a failure anywhere
//! leaves the ledger untouched; the executed swaps themselves are not
//! compensated, and the unique tx_hash makes a retry of the same payment a
//! safe no-op.

use std::sync::Arc;

use chrono::{Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{self, NewStake, NewSubscription, SettlementDb, UpsertUser};
use crate::error::{EngineError, Result};
use crate::events::DomainEvent;
use crate::plans;
use crate::pricing::{round9, SplitConfig, SplitOverrides, SwapRequest, SwapRouter, SwapTag};
use crate::services::{BurnWebhook, PaymentVerifier, VerificationRequest};

/// One inbound payment to process
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub beneficiary: UpsertUser,
    /// Plan code; unknown codes are accepted and staked without a lock
    pub plan: String,
    /// Source-chain transaction hash, the idempotency key
    pub tx_hash: String,
    /// Gross payment in source currency
    pub gross_amount: f64,
    /// Per-request split overrides, defaults apply where absent
    #[serde(default)]
    pub splits: SplitOverrides,
    /// Deposit address the payment must have credited; falls back to the
    /// manager's configured address
    #[serde(default)]
    pub expected_address: Option<String>,
}

/// Every computed amount of a settled payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentBreakdown {
    pub gross_amount: f64,
    pub operations_amount: f64,
    pub auto_invest_amount: f64,
    pub burn_amount: f64,
    pub auto_invest_tokens: f64,
    pub burn_tokens: f64,
    pub price_used: Option<f64>,
    pub burn_tx_hash: Option<String>,
    pub splits: SplitConfig,
}

/// Proof of settlement returned to the caller
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionReceipt {
    pub user_id: String,
    pub subscription_id: String,
    pub stake_id: Option<String>,
    pub plan: String,
    pub tx_hash: String,
    pub breakdown: PaymentBreakdown,
}

/// Orchestrates verification, splitting, swaps, burn and persistence
pub struct SubscriptionManager {
    db: Arc<SettlementDb>,
    verifier: Arc<dyn PaymentVerifier>,
    swaps: Arc<dyn SwapRouter>,
    burner: Arc<dyn BurnWebhook>,
    /// Deposit address payments are checked against when a request does
    /// not name one
    expected_address: Option<String>,
}

impl SubscriptionManager {
    pub fn new(
        db: Arc<SettlementDb>,
        verifier: Arc<dyn PaymentVerifier>,
        swaps: Arc<dyn SwapRouter>,
        burner: Arc<dyn BurnWebhook>,
        expected_address: Option<String>,
    ) -> Self {
        Self {
            db,
            verifier,
            swaps,
            burner,
            expected_address,
        }
    }

    /// Process one inbound payment end to end
    #[instrument(skip(self, req), fields(tx_hash = %req.tx_hash, plan = %req.plan))]
    pub async fn pay_for(&self, req: PaymentRequest) -> Result<SubscriptionReceipt> {
        // Input and split validation happen before any external call
        if req.tx_hash.trim().is_empty() {
            return Err(EngineError::BadRequest("tx_hash is required".into()));
        }
        if req.beneficiary.wallet_address.trim().is_empty() {
            return Err(EngineError::BadRequest("wallet_address is required".into()));
        }
        if !req.gross_amount.is_finite() || req.gross_amount <= 0.0 {
            return Err(EngineError::BadRequest(format!(
                "gross_amount {} must be a positive number",
                req.gross_amount
            )));
        }
        let splits = SplitConfig::resolve(&req.splits)?;

        // Verify the deposit on the source ledger
        let expected_address = req
            .expected_address
            .clone()
            .or_else(|| self.expected_address.clone());
        let verification = self
            .verifier
            .verify(&VerificationRequest {
                tx_ref: req.tx_hash.clone(),
                expected_address,
                expected_amount: req.gross_amount,
            })
            .await?;
        if !verification.ok {
            return Err(EngineError::PaymentVerification(
                verification
                    .error
                    .clone()
                    .unwrap_or_else(|| "source ledger rejected the payment".to_string()),
            ));
        }

        let amounts = splits.apply(req.gross_amount);

        // Sequential swaps: auto-invest first, then burn. No interleaved
        // partial state, and a failure aborts before anything persists.
        let auto_swap = self
            .swaps
            .execute(&SwapRequest {
                amount: amounts.auto_invest,
                tag: SwapTag::AutoInvest,
            })
            .await?;
        let burn_swap = self
            .swaps
            .execute(&SwapRequest {
                amount: amounts.burn,
                tag: SwapTag::Burn,
            })
            .await?;

        let burn_tx_hash = if burn_swap.target_amount > 0.0 {
            let receipt = self
                .burner
                .trigger(burn_swap.target_amount, &req.tx_hash)
                .await?;
            Some(receipt.tx_hash)
        } else {
            None
        };

        let now = Utc::now();
        let subscription_id = Uuid::new_v4().to_string();

        let stake = if auto_swap.target_amount > 0.0 {
            let policy = plans::policy_for(&req.plan);
            if plans::Plan::from_code(&req.plan).is_none() {
                warn!(plan = %req.plan, "Unknown plan code, staking without a lock");
            }
            let locked_until = policy
                .lock_months
                .map(|m| (now + Months::new(m)).to_rfc3339());
            Some(NewStake {
                id: Uuid::new_v4().to_string(),
                amount_tokens: auto_swap.target_amount,
                multiplier: policy.multiplier,
                weight: round9(auto_swap.target_amount * policy.multiplier),
                lock_months: policy.lock_months,
                locked_until,
                early_exit_penalty: policy.early_exit_penalty,
            })
        } else {
            None
        };

        let mut events = vec![DomainEvent::PaymentRecorded {
            subscription_id: subscription_id.clone(),
            wallet_address: req.beneficiary.wallet_address.clone(),
            plan: req.plan.clone(),
            tx_hash: req.tx_hash.clone(),
            gross_amount: req.gross_amount,
            operations_amount: amounts.operations,
            auto_invest_amount: amounts.auto_invest,
            burn_amount: amounts.burn,
            auto_invest_tokens: auto_swap.target_amount,
            burn_tokens: burn_swap.target_amount,
        }];
        if let Some(ref burn_hash) = burn_tx_hash {
            events.push(DomainEvent::BurnExecuted {
                tx_hash: req.tx_hash.clone(),
                burn_tx_hash: burn_hash.clone(),
                amount_tokens: burn_swap.target_amount,
            });
        }

        let price_used = if auto_swap.price_used > 0.0 {
            Some(auto_swap.price_used)
        } else if burn_swap.price_used > 0.0 {
            Some(burn_swap.price_used)
        } else {
            None
        };

        let record = NewSubscription {
            id: subscription_id,
            beneficiary: req.beneficiary,
            plan: req.plan.clone(),
            tx_hash: req.tx_hash.clone(),
            gross_amount: req.gross_amount,
            operations_amount: amounts.operations,
            auto_invest_amount: amounts.auto_invest,
            burn_amount: amounts.burn,
            auto_invest_tokens: auto_swap.target_amount,
            burn_tokens: burn_swap.target_amount,
            price_used,
            price_snapshot_id: auto_swap
                .snapshot_id
                .clone()
                .or_else(|| burn_swap.snapshot_id.clone()),
            auto_invest_swap_ref: auto_swap.tx_ref.clone(),
            burn_swap_ref: burn_swap.tx_ref.clone(),
            burn_tx_hash: burn_tx_hash.clone(),
            operations_pct: splits.operations_pct,
            auto_invest_pct: splits.auto_invest_pct,
            burn_pct: splits.burn_pct,
            verification_json: Some(serde_json::to_string(&verification)?),
            created_at: now.to_rfc3339(),
            stake,
            events,
        };

        let recorded = self
            .db
            .with_conn_mut(|conn| db::subscriptions::record_settled_payment(conn, &record))?;

        info!(
            subscription_id = %recorded.subscription_id,
            user_id = %recorded.user_id,
            gross = req.gross_amount,
            auto_invest_tokens = auto_swap.target_amount,
            burn_tokens = burn_swap.target_amount,
            "Payment settled"
        );

        Ok(SubscriptionReceipt {
            user_id: recorded.user_id,
            subscription_id: recorded.subscription_id,
            stake_id: recorded.stake_id,
            plan: req.plan,
            tx_hash: req.tx_hash,
            breakdown: PaymentBreakdown {
                gross_amount: req.gross_amount,
                operations_amount: amounts.operations,
                auto_invest_amount: amounts.auto_invest,
                burn_amount: amounts.burn,
                auto_invest_tokens: auto_swap.target_amount,
                burn_tokens: burn_swap.target_amount,
                price_used,
                burn_tx_hash,
                splits,
            },
        })
    }
}
