//! Split arithmetic, rounding rules and swap execution
//!
//! All token quantities are rounded to 9 decimal places at computation
//! boundaries, currency amounts to 2. Intermediate math stays in full f64
//! precision; only values that cross a boundary (persisted, returned, or fed
//! into a collaborator call) get rounded.

pub mod splits;
pub mod swap;

pub use splits::{SplitAmounts, SplitConfig, SplitOverrides};
pub use swap::{SwapConfig, SwapExecutor, SwapOutcome, SwapRequest, SwapRouter, SwapTag};

/// Round a token quantity to 9 decimal places
pub fn round9(value: f64) -> f64 {
    (value * 1e9).round() / 1e9
}

/// Round a currency amount to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round9() {
        assert_eq!(round9(0.123456789123), 0.123456789);
        assert_eq!(round9(1.0000000005), 1.000000001);
        assert_eq!(round9(0.0), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(64.004999), 64.0);
        assert_eq!(round2(64.005), 64.01);
        assert_eq!(round2(-3.456), -3.46);
    }
}
