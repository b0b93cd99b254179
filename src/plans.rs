//! Subscription plan catalog
//!
//! Each plan carries the stake policy applied when auto-invested tokens are
//! locked: lock duration, stake weight multiplier and the penalty charged on
//! early exit. Unknown plan codes fall back to an unlocked policy with no
//! bonus so a typo in a client never blocks a payment.

use serde::{Deserialize, Serialize};

/// Known subscription plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    Standard,
    Premium,
    Vip,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Basic, Plan::Standard, Plan::Premium, Plan::Vip];

    /// Parse a plan code, case-insensitively
    pub fn from_code(code: &str) -> Option<Plan> {
        match code.to_ascii_lowercase().as_str() {
            "basic" => Some(Plan::Basic),
            "standard" => Some(Plan::Standard),
            "premium" => Some(Plan::Premium),
            "vip" => Some(Plan::Vip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Basic => "basic",
            Plan::Standard => "standard",
            Plan::Premium => "premium",
            Plan::Vip => "vip",
        }
    }

    /// Stake policy attached to this plan
    pub fn policy(&self) -> StakePolicy {
        match self {
            Plan::Basic => StakePolicy {
                lock_months: None,
                multiplier: 1.0,
                early_exit_penalty: 0.0,
            },
            Plan::Standard => StakePolicy {
                lock_months: Some(3),
                multiplier: 1.1,
                early_exit_penalty: 0.05,
            },
            Plan::Premium => StakePolicy {
                lock_months: Some(6),
                multiplier: 1.25,
                early_exit_penalty: 0.10,
            },
            Plan::Vip => StakePolicy {
                lock_months: Some(12),
                multiplier: 1.5,
                early_exit_penalty: 0.15,
            },
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stake terms for a plan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakePolicy {
    /// Lock duration in months, `None` for no lock
    pub lock_months: Option<u32>,
    /// Stake weight multiplier applied to the token amount
    pub multiplier: f64,
    /// Fraction of the stake forfeited on early exit (0.05 = 5%)
    pub early_exit_penalty: f64,
}

impl Default for StakePolicy {
    fn default() -> Self {
        StakePolicy {
            lock_months: None,
            multiplier: 1.0,
            early_exit_penalty: 0.0,
        }
    }
}

/// Resolve the stake policy for a plan code, unknown codes get the default
pub fn policy_for(code: &str) -> StakePolicy {
    Plan::from_code(code)
        .map(|p| p.policy())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_lookup() {
        assert_eq!(Plan::from_code("vip"), Some(Plan::Vip));
        assert_eq!(Plan::from_code("VIP"), Some(Plan::Vip));
        assert_eq!(Plan::from_code("gold"), None);
    }

    #[test]
    fn test_policies() {
        let vip = policy_for("vip");
        assert_eq!(vip.lock_months, Some(12));
        assert_eq!(vip.multiplier, 1.5);
        assert_eq!(vip.early_exit_penalty, 0.15);

        let standard = policy_for("standard");
        assert_eq!(standard.lock_months, Some(3));
        assert_eq!(standard.multiplier, 1.1);
    }

    #[test]
    fn test_unknown_plan_gets_default_policy() {
        let policy = policy_for("no-such-plan");
        assert_eq!(policy.lock_months, None);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.early_exit_penalty, 0.0);
    }

    #[test]
    fn test_serde_roundtrip_lowercase() {
        let json = serde_json::to_string(&Plan::Premium).unwrap();
        assert_eq!(json, "\"premium\"");
        let back: Plan = serde_json::from_str("\"vip\"").unwrap();
        assert_eq!(back, Plan::Vip);
    }
}
