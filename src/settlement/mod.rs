//! Fund cycle settlement
//!
//! A cycle is settled in one pass: recompute every investor's share from
//! the deposit ledger, split the admin-entered profit (or absorb the loss),
//! close the cycle and open its successor with carryover and reinvestment
//! deposits — all inside a single ledger transaction. Cash-out swaps and
//! investor notifications happen around that transaction and are allowed
//! to fail without unwinding it.

pub mod shares;

pub use shares::{compute_payouts, compute_shares, InvestorStanding, PayoutEntry};

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::{
    self, CycleClosure, CycleRow, DepositKind, DepositRow, SeedDeposit, SettlementDb, UpsertUser,
};
use crate::error::{EngineError, Result};
use crate::events::DomainEvent;
use crate::pricing::{round2, round9};
use crate::services::{
    AdminResolver, AllocatorBridge, CashOutRequest, NotificationChannel, PriceOracle,
};

/// Profit or loss classification of one settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    Profit,
    Loss,
}

impl SettlementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementMode::Profit => "profit",
            SettlementMode::Loss => "loss",
        }
    }
}

/// Admin request to settle the active cycle
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    /// Cycle result in source currency; zero or negative means a loss
    pub profit: f64,
    #[serde(default)]
    pub notes: Option<String>,
    /// Optional guard: the cycle the caller believes is active. A stale id
    /// turns into a clean `AlreadySettled` instead of settling the wrong
    /// cycle.
    #[serde(default)]
    pub cycle_id: Option<String>,
}

/// Admin request to record fresh capital
#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub beneficiary: UpsertUser,
    pub amount: f64,
}

/// Aggregated settlement figures
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SettlementTotals {
    pub payout: f64,
    pub reinvested: f64,
    pub fees: f64,
    pub losses: f64,
}

/// The freshly opened successor cycle
#[derive(Debug, Clone, Serialize)]
pub struct NextCycle {
    pub cycle_id: String,
    pub cycle_number: i64,
    pub opened_at: String,
    pub pool_total: f64,
    pub shares: Vec<InvestorStanding>,
}

/// Result of one settlement
#[derive(Debug, Clone, Serialize)]
pub struct SettlementSummary {
    pub cycle_id: String,
    pub cycle_number: i64,
    pub mode: SettlementMode,
    /// Grand total, exactly as entered by the administrator
    pub profit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub totals: SettlementTotals,
    pub payouts: Vec<PayoutEntry>,
    pub next_cycle: NextCycle,
}

/// Active cycle read-model
#[derive(Debug, Clone, Serialize)]
pub struct CycleOverview {
    pub cycle_id: String,
    pub cycle_number: i64,
    pub opened_at: String,
    pub pool_total: f64,
    pub shares: Vec<InvestorStanding>,
}

/// Orchestrates cycle settlement and the cycle ledger's admin operations
pub struct FundCycleEngine {
    db: Arc<SettlementDb>,
    admin: Arc<dyn AdminResolver>,
    notifier: Arc<dyn NotificationChannel>,
    allocator: Option<Arc<dyn AllocatorBridge>>,
    oracle: Arc<dyn PriceOracle>,
    /// Token symbol quoted when sizing cash-out swaps
    symbol: String,
    /// Serializes concurrent settle requests in this process; the ledger's
    /// compare-and-set on the cycle row stays the cross-process backstop
    settle_lock: tokio::sync::Mutex<()>,
}

impl FundCycleEngine {
    pub fn new(
        db: Arc<SettlementDb>,
        admin: Arc<dyn AdminResolver>,
        notifier: Arc<dyn NotificationChannel>,
        allocator: Option<Arc<dyn AllocatorBridge>>,
        oracle: Arc<dyn PriceOracle>,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            db,
            admin,
            notifier,
            allocator,
            oracle,
            symbol: symbol.into(),
            settle_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn require_admin(&self, caller: &str) -> Result<()> {
        if self.admin.is_admin(caller).await? {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(
                "caller is not an administrator".to_string(),
            ))
        }
    }

    /// Settle the active cycle and open its successor
    #[instrument(skip(self, caller, req), fields(profit = req.profit))]
    pub async fn settle_cycle(&self, caller: &str, req: SettleRequest) -> Result<SettlementSummary> {
        self.require_admin(caller).await?;

        if !req.profit.is_finite() {
            return Err(EngineError::InvalidProfit(format!(
                "profit {} is not a number",
                req.profit
            )));
        }

        let _guard = self.settle_lock.lock().await;

        let active = self.resolve_active_cycle(req.cycle_id.as_deref())?;
        let mode = if req.profit > 0.0 {
            SettlementMode::Profit
        } else {
            SettlementMode::Loss
        };

        // Ownership is recomputed from the deposit ledger every time, never
        // read from a stored percentage
        let bases = self
            .db
            .with_conn(|conn| db::cycles::investor_bases(conn, &active.id))?;
        let standings = compute_shares(&bases);
        let mut entries = compute_payouts(req.profit, &standings);

        info!(
            cycle_id = %active.id,
            cycle_number = active.cycle_number,
            mode = mode.as_str(),
            investors = entries.len(),
            "Settling cycle"
        );

        if mode == SettlementMode::Profit {
            self.cash_out_payouts(&active.id, &mut entries).await;
        }

        let totals = SettlementTotals {
            payout: round2(entries.iter().map(|e| e.payout).sum()),
            reinvested: round2(entries.iter().map(|e| e.reinvest).sum()),
            fees: round2(entries.iter().map(|e| e.fee).sum()),
            losses: round2(entries.iter().map(|e| e.loss).sum()),
        };

        // Carryover first, then reinvestment, as separate provenance-keeping
        // rows. An investor with neither gets no deposit and exits cleanly.
        let mut seeds = Vec::new();
        for entry in &entries {
            if entry.carryover > 0.0 {
                seeds.push(SeedDeposit {
                    id: Uuid::new_v4().to_string(),
                    user_id: entry.user_id.clone(),
                    amount: entry.carryover,
                    kind: DepositKind::Carryover,
                });
            }
            if entry.reinvest > 0.0 {
                seeds.push(SeedDeposit {
                    id: Uuid::new_v4().to_string(),
                    user_id: entry.user_id.clone(),
                    amount: entry.reinvest,
                    kind: DepositKind::Reinvestment,
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        let next_cycle_id = Uuid::new_v4().to_string();
        let settlement_json = serde_json::to_string(&serde_json::json!({
            "mode": mode.as_str(),
            "profit": req.profit,
            "investor_count": entries.len(),
            "totals": totals,
            "payouts": entries,
        }))
        .map_err(|e| EngineError::Internal(format!("settlement summary: {}", e)))?;

        let closure = CycleClosure {
            cycle_id: active.id.clone(),
            settled_at: now.clone(),
            profit: req.profit,
            notes: req.notes.clone(),
            settlement_json,
            next_cycle_id: next_cycle_id.clone(),
            next_opened_at: now,
            seeds,
            events: vec![DomainEvent::CycleSettled {
                cycle_id: active.id.clone(),
                cycle_number: active.cycle_number,
                profit: req.profit,
                mode: mode.as_str().to_string(),
                investor_count: entries.len(),
                total_payout: totals.payout,
                total_reinvested: totals.reinvested,
                total_fees: totals.fees,
                next_cycle_id: next_cycle_id.clone(),
                next_cycle_number: active.cycle_number + 1,
            }],
        };

        // The one durable "cycle is settled" marker. Everything after this
        // point is best effort.
        let next = self
            .db
            .with_conn_mut(|conn| db::cycles::settle_and_open_next(conn, &closure))?;

        let next_bases = self
            .db
            .with_conn(|conn| db::cycles::investor_bases(conn, &next.id))?;
        let next_cycle = NextCycle {
            cycle_id: next.id.clone(),
            cycle_number: next.cycle_number,
            opened_at: next.opened_at.clone(),
            pool_total: round2(next_bases.iter().map(|b| b.base).sum()),
            shares: compute_shares(&next_bases),
        };

        self.notify_investors(&active, mode, &standings, &entries)
            .await;

        info!(
            cycle_id = %active.id,
            next_cycle_id = %next.id,
            total_payout = totals.payout,
            total_losses = totals.losses,
            "Cycle settled"
        );

        Ok(SettlementSummary {
            cycle_id: active.id,
            cycle_number: active.cycle_number,
            mode,
            profit: req.profit,
            notes: req.notes,
            totals,
            payouts: entries,
            next_cycle,
        })
    }

    /// Open cycle #1 on an empty ledger
    pub async fn open_initial_cycle(&self, caller: &str) -> Result<CycleRow> {
        self.require_admin(caller).await?;
        let now = Utc::now().to_rfc3339();
        let cycle = self
            .db
            .with_conn_mut(|conn| db::cycles::open_initial_cycle(conn, &now))?;
        info!(cycle_id = %cycle.id, "Initial fund cycle opened");
        Ok(cycle)
    }

    /// Record fresh capital into the active cycle
    pub async fn record_deposit(&self, caller: &str, req: DepositRequest) -> Result<DepositRow> {
        self.require_admin(caller).await?;

        if req.beneficiary.wallet_address.trim().is_empty() {
            return Err(EngineError::InvalidDeposit(
                "wallet_address is required".to_string(),
            ));
        }
        if !req.amount.is_finite() || req.amount <= 0.0 {
            return Err(EngineError::InvalidDeposit(format!(
                "amount {} must be a positive number",
                req.amount
            )));
        }

        // Serialized against settlement: a deposit must not land in a cycle
        // after its bases were read but before it closes, or the funds would
        // belong to neither the settlement math nor the successor's seeds
        let _guard = self.settle_lock.lock().await;

        let active = self
            .db
            .with_conn(|conn| db::cycles::get_active_cycle(conn))?
            .ok_or(EngineError::NoActiveCycle)?;

        let now = Utc::now().to_rfc3339();
        let amount = round2(req.amount);
        let deposit = self.db.with_conn(|conn| {
            let user = db::users::upsert_user(conn, &req.beneficiary)?;
            db::cycles::insert_deposit(conn, &active.id, &user.id, amount, DepositKind::Initial, &now)
        })?;

        info!(
            cycle_id = %active.id,
            user_id = %deposit.user_id,
            amount = amount,
            "Deposit recorded"
        );
        Ok(deposit)
    }

    /// Active cycle plus its recomputed share distribution
    pub async fn active_cycle_overview(&self) -> Result<CycleOverview> {
        let active = self
            .db
            .with_conn(|conn| db::cycles::get_active_cycle(conn))?
            .ok_or(EngineError::NoActiveCycle)?;
        let bases = self
            .db
            .with_conn(|conn| db::cycles::investor_bases(conn, &active.id))?;

        Ok(CycleOverview {
            cycle_id: active.id,
            cycle_number: active.cycle_number,
            opened_at: active.opened_at,
            pool_total: round2(bases.iter().map(|b| b.base).sum()),
            shares: compute_shares(&bases),
        })
    }

    /// Resolve the cycle to settle, honoring the caller's optional guard id
    fn resolve_active_cycle(&self, requested: Option<&str>) -> Result<CycleRow> {
        let active = self.db.with_conn(|conn| db::cycles::get_active_cycle(conn))?;

        match (active, requested) {
            (Some(active), None) => Ok(active),
            (Some(active), Some(id)) if active.id == id => Ok(active),
            (_, Some(id)) => {
                // The named cycle is not active: distinguish "settled by an
                // earlier request" from "no such cycle"
                match self.db.with_conn(|conn| db::cycles::get_cycle(conn, id))? {
                    Some(cycle) if cycle.is_settled() => Err(EngineError::AlreadySettled {
                        cycle_id: id.to_string(),
                    }),
                    Some(_) => Err(EngineError::Internal(format!(
                        "cycle {} is neither active nor settled",
                        id
                    ))),
                    None => Err(EngineError::BadRequest(format!("unknown cycle {}", id))),
                }
            }
            (None, None) => Err(EngineError::NoActiveCycle),
        }
    }

    /// Request cash-out swaps for positive payouts backed by active stakes
    ///
    /// Every failure in here is logged and swallowed; settlement math never
    /// depends on the bridge.
    async fn cash_out_payouts(&self, cycle_id: &str, entries: &mut [PayoutEntry]) {
        let Some(ref bridge) = self.allocator else {
            return;
        };

        let price = match self.oracle.latest(&self.symbol).await {
            Ok(snapshot) if snapshot.price > 0.0 => snapshot.price,
            Ok(snapshot) => {
                warn!(price = snapshot.price, "Skipping cash-outs at non-positive price");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Skipping cash-outs, oracle unavailable");
                return;
            }
        };

        for entry in entries.iter_mut() {
            if entry.payout <= 0.0 {
                continue;
            }
            let stake_total = match self
                .db
                .with_conn(|conn| db::subscriptions::active_stake_total(conn, &entry.user_id))
            {
                Ok(total) => total,
                Err(e) => {
                    warn!(user_id = %entry.user_id, error = %e, "Skipping cash-out, stake lookup failed");
                    continue;
                }
            };
            if stake_total <= 0.0 {
                continue;
            }

            let dct_to_swap = round9((entry.payout / price).min(stake_total));
            let request = CashOutRequest {
                investor_id: entry.user_id.clone(),
                cycle_id: cycle_id.to_string(),
                amount_usdt: entry.payout,
                dct_to_swap,
            };
            match bridge.cash_out(&request).await {
                Ok(receipt) => {
                    entry.cash_out_tx = receipt.ton_tx_hash;
                }
                Err(e) => {
                    warn!(
                        user_id = %entry.user_id,
                        amount_usdt = entry.payout,
                        error = %e,
                        "Cash-out failed, settlement continues"
                    );
                }
            }
        }
    }

    /// Best-effort settlement notifications, one message per investor
    async fn notify_investors(
        &self,
        cycle: &CycleRow,
        mode: SettlementMode,
        standings: &[InvestorStanding],
        entries: &[PayoutEntry],
    ) {
        for entry in entries {
            let chat_id = standings
                .iter()
                .find(|s| s.user_id == entry.user_id)
                .and_then(|s| s.chat_id.clone());
            let Some(chat_id) = chat_id else {
                continue;
            };

            let text = match mode {
                SettlementMode::Profit => format!(
                    "Cycle {} settled. Your share: {}%. Payout: {:.2}, reinvested: {:.2}, fee: {:.2}.",
                    cycle.cycle_number, entry.share_pct, entry.payout, entry.reinvest, entry.fee
                ),
                SettlementMode::Loss => format!(
                    "Cycle {} settled at a loss. Absorbed: {:.2}. Carried into the next cycle: {:.2}.",
                    cycle.cycle_number, entry.loss, entry.carryover
                ),
            };

            if let Err(e) = self.notifier.send(&chat_id, &text).await {
                warn!(chat_id = %chat_id, error = %e, "Settlement notification failed");
            }
        }
    }
}
