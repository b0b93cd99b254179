//! Pro-rata share and payout math
//!
//! Pure functions over deposit sums: ownership fractions, the tripartite
//! profit split and loss absorption. Fractions are kept exact; only the
//! currency figures handed outward are rounded to cents.

use serde::{Deserialize, Serialize};

use crate::db::InvestorBase;
use crate::pricing::round2;

/// Payout share of each gross profit slice
pub const PAYOUT_SHARE: f64 = 0.64;
/// Reinvested share of each gross profit slice
pub const REINVEST_SHARE: f64 = 0.16;
/// Performance fee share of each gross profit slice
pub const FEE_SHARE: f64 = 0.20;

/// One investor's position in a cycle, recomputed from deposits
#[derive(Debug, Clone, Serialize)]
pub struct InvestorStanding {
    pub user_id: String,
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Summed contributions in source currency
    pub base: f64,
    /// Exact ownership fraction of the pool
    #[serde(skip)]
    pub share_fraction: f64,
    /// Display percentage, rounded to cents
    pub share_pct: f64,
}

/// One investor's computed settlement result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutEntry {
    pub user_id: String,
    pub wallet_address: String,
    pub base: f64,
    pub share_pct: f64,
    /// This investor's slice of the total profit (negative in loss mode
    /// before classification; stored as the signed slice)
    pub gross: f64,
    pub payout: f64,
    pub reinvest: f64,
    pub fee: f64,
    pub loss: f64,
    /// Carryover base seeded into the next cycle
    pub carryover: f64,
    /// Chain receipt of the cash-out swap, when the bridge ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_out_tx: Option<String>,
}

/// Recompute ownership from summed deposits
///
/// Fractions always sum to exactly 1 over a non-empty pool; the rounded
/// display percentages may drift within a cent.
pub fn compute_shares(bases: &[InvestorBase]) -> Vec<InvestorStanding> {
    let total: f64 = bases.iter().map(|b| b.base).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    bases
        .iter()
        .map(|b| {
            let fraction = b.base / total;
            InvestorStanding {
                user_id: b.user_id.clone(),
                wallet_address: b.wallet_address.clone(),
                chat_id: b.chat_id.clone(),
                base: b.base,
                share_fraction: fraction,
                share_pct: round2(fraction * 100.0),
            }
        })
        .collect()
}

/// Split the total profit (or loss) across the standings
///
/// Profit mode divides each gross slice 64/16/20 into payout, reinvest and
/// fee. Loss mode zeroes those and absorbs the loss pro-rata against each
/// base, with the carryover floored at zero.
pub fn compute_payouts(total_profit: f64, standings: &[InvestorStanding]) -> Vec<PayoutEntry> {
    let profit_mode = total_profit > 0.0;

    standings
        .iter()
        .map(|s| {
            let gross = round2(total_profit * s.share_fraction);
            if profit_mode {
                PayoutEntry {
                    user_id: s.user_id.clone(),
                    wallet_address: s.wallet_address.clone(),
                    base: s.base,
                    share_pct: s.share_pct,
                    gross,
                    payout: round2(gross * PAYOUT_SHARE),
                    reinvest: round2(gross * REINVEST_SHARE),
                    fee: round2(gross * FEE_SHARE),
                    loss: 0.0,
                    carryover: s.base,
                    cash_out_tx: None,
                }
            } else {
                let loss = gross.abs();
                PayoutEntry {
                    user_id: s.user_id.clone(),
                    wallet_address: s.wallet_address.clone(),
                    base: s.base,
                    share_pct: s.share_pct,
                    gross,
                    payout: 0.0,
                    reinvest: 0.0,
                    fee: 0.0,
                    loss,
                    carryover: round2(s.base - loss).max(0.0),
                    cash_out_tx: None,
                }
            }
        })
        .collect()
}
