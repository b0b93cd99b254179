//! Gross payment split configuration
//!
//! Every payment is divided across three buckets: operations (kept as
//! working capital), auto-invest (swapped into tokens and staked) and burn
//! (swapped and destroyed). Percentages are validated against per-bucket
//! bounds and must sum to exactly 100.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::pricing::round9;

/// Default split: 60% operations, 30% auto-invest, 10% burn
pub const DEFAULT_OPERATIONS_PCT: f64 = 60.0;
pub const DEFAULT_AUTO_INVEST_PCT: f64 = 30.0;
pub const DEFAULT_BURN_PCT: f64 = 10.0;

/// Inclusive percentage bounds per bucket
pub const OPERATIONS_BOUNDS: (f64, f64) = (40.0, 75.0);
pub const AUTO_INVEST_BOUNDS: (f64, f64) = (15.0, 45.0);
pub const BURN_BOUNDS: (f64, f64) = (5.0, 20.0);

/// Tolerance for the sum-to-100 check
const SUM_TOLERANCE: f64 = 1e-9;

/// A fully resolved split, validated on construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub operations_pct: f64,
    pub auto_invest_pct: f64,
    pub burn_pct: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            operations_pct: DEFAULT_OPERATIONS_PCT,
            auto_invest_pct: DEFAULT_AUTO_INVEST_PCT,
            burn_pct: DEFAULT_BURN_PCT,
        }
    }
}

/// Per-request overrides, each bucket independently optional
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SplitOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_invest_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burn_pct: Option<f64>,
}

impl SplitOverrides {
    pub fn is_empty(&self) -> bool {
        self.operations_pct.is_none()
            && self.auto_invest_pct.is_none()
            && self.burn_pct.is_none()
    }
}

/// Gross amount divided into bucket amounts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitAmounts {
    pub operations: f64,
    pub auto_invest: f64,
    pub burn: f64,
}

impl SplitConfig {
    /// Merge overrides onto the defaults and validate the result
    ///
    /// A rejected override leaves nothing behind: the caller gets an
    /// [`EngineError::InvalidSplit`] and no config.
    pub fn resolve(overrides: &SplitOverrides) -> Result<SplitConfig> {
        let config = SplitConfig {
            operations_pct: overrides.operations_pct.unwrap_or(DEFAULT_OPERATIONS_PCT),
            auto_invest_pct: overrides.auto_invest_pct.unwrap_or(DEFAULT_AUTO_INVEST_PCT),
            burn_pct: overrides.burn_pct.unwrap_or(DEFAULT_BURN_PCT),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check per-bucket bounds and the sum-to-100 rule
    pub fn validate(&self) -> Result<()> {
        check_bounds("operations", self.operations_pct, OPERATIONS_BOUNDS)?;
        check_bounds("auto_invest", self.auto_invest_pct, AUTO_INVEST_BOUNDS)?;
        check_bounds("burn", self.burn_pct, BURN_BOUNDS)?;

        let sum = self.operations_pct + self.auto_invest_pct + self.burn_pct;
        if (sum - 100.0).abs() > SUM_TOLERANCE {
            return Err(EngineError::InvalidSplit(format!(
                "percentages sum to {} instead of 100",
                sum
            )));
        }
        Ok(())
    }

    /// Divide a gross amount into bucket amounts, each rounded to 9 dp
    pub fn apply(&self, gross: f64) -> SplitAmounts {
        SplitAmounts {
            operations: round9(gross * self.operations_pct / 100.0),
            auto_invest: round9(gross * self.auto_invest_pct / 100.0),
            burn: round9(gross * self.burn_pct / 100.0),
        }
    }
}

fn check_bounds(bucket: &str, value: f64, (min, max): (f64, f64)) -> Result<()> {
    if !value.is_finite() {
        return Err(EngineError::InvalidSplit(format!(
            "{} percentage is not a number",
            bucket
        )));
    }
    if value < min || value > max {
        return Err(EngineError::InvalidSplit(format!(
            "{} percentage {} outside allowed range {}..={}",
            bucket, value, min, max
        )));
    }
    Ok(())
}
