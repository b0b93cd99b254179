//! Error types for the settlement engine
//!
//! Every fallible operation returns [`EngineError`]. Validation failures map
//! to 4xx responses, collaborator failures to 502, ledger failures to 503.

use hyper::StatusCode;
use thiserror::Error;

/// Errors produced by payment processing, cycle settlement and the HTTP layer
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or unparseable request input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Split percentages out of bounds or not summing to 100
    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    /// Profit figure rejected before settlement started
    #[error("Invalid profit: {0}")]
    InvalidProfit(String),

    /// Deposit rejected before it was recorded
    #[error("Invalid deposit: {0}")]
    InvalidDeposit(String),

    /// Caller is not an authorized administrator
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Inbound payment could not be confirmed on the source ledger
    #[error("Payment verification failed: {0}")]
    PaymentVerification(String),

    /// Swap collaborator rejected or failed the conversion
    #[error("Swap execution failed: {0}")]
    SwapExecution(String),

    /// Burn webhook did not return a usable receipt
    #[error("Burn trigger failed: {0}")]
    BurnTrigger(String),

    /// A subscription for this payment hash already exists
    #[error("Duplicate subscription for tx {tx_hash}")]
    DuplicateSubscription { tx_hash: String },

    /// No fund cycle is currently open
    #[error("No active fund cycle")]
    NoActiveCycle,

    /// The named cycle was settled by an earlier request
    #[error("Cycle {cycle_id} is already settled")]
    AlreadySettled { cycle_id: String },

    /// Underlying SQLite failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Startup or wiring problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Map an error to the HTTP status code it should surface as
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::BadRequest(_)
            | EngineError::InvalidSplit(_)
            | EngineError::InvalidProfit(_)
            | EngineError::InvalidDeposit(_) => StatusCode::BAD_REQUEST,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::PaymentVerification(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::SwapExecution(_) | EngineError::BurnTrigger(_) => StatusCode::BAD_GATEWAY,
            EngineError::DuplicateSubscription { .. } | EngineError::AlreadySettled { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::NoActiveCycle => StatusCode::NOT_FOUND,
            EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Config(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable code for API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::BadRequest(_) => "bad_request",
            EngineError::InvalidSplit(_) => "invalid_split",
            EngineError::InvalidProfit(_) => "invalid_profit",
            EngineError::InvalidDeposit(_) => "invalid_deposit",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::PaymentVerification(_) => "payment_verification",
            EngineError::SwapExecution(_) => "swap_execution",
            EngineError::BurnTrigger(_) => "burn_trigger",
            EngineError::DuplicateSubscription { .. } => "duplicate_subscription",
            EngineError::NoActiveCycle => "no_active_cycle",
            EngineError::AlreadySettled { .. } => "already_settled",
            EngineError::Persistence(_) => "persistence",
            EngineError::Config(_) => "config",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Convenience result type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EngineError::InvalidSplit("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EngineError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            EngineError::DuplicateSubscription {
                tx_hash: "0xabc".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            EngineError::AlreadySettled {
                cycle_id: "c1".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(EngineError::NoActiveCycle.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::SwapExecution("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EngineError::Persistence("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(EngineError::NoActiveCycle.code(), "no_active_cycle");
        assert_eq!(
            EngineError::DuplicateSubscription {
                tx_hash: "t".into()
            }
            .code(),
            "duplicate_subscription"
        );
    }
}
