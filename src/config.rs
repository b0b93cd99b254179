//! Configuration for the settlement engine
//!
//! CLI arguments and environment variable handling using clap.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Paymaster - payment settlement and fund-cycle reconciliation engine
#[derive(Parser, Debug, Clone)]
#[command(name = "paymaster")]
#[command(about = "Payment settlement and fund-cycle reconciliation engine")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Path to the SQLite ledger database
    #[arg(long, env = "DB_PATH", default_value = "paymaster.db")]
    pub db_path: PathBuf,

    /// Enable development mode (local fallbacks for missing collaborators)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Comma-separated administrator tokens for settlement endpoints
    #[arg(long, env = "ADMIN_TOKENS")]
    pub admin_tokens: Option<String>,

    /// Base URL of the price oracle (e.g. "https://oracle.example.com")
    #[arg(long, env = "ORACLE_URL")]
    pub oracle_url: Option<String>,

    /// Base URL of the blockchain payment verifier
    #[arg(long, env = "VERIFIER_URL")]
    pub verifier_url: Option<String>,

    /// Burn webhook URL, called with the burn bucket's token amount
    #[arg(long, env = "BURN_WEBHOOK_URL")]
    pub burn_webhook_url: Option<String>,

    /// Notification relay URL for investor messages
    #[arg(long, env = "NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Base URL of the allocator bridge for cash-out swaps (optional)
    #[arg(long, env = "ALLOCATOR_URL")]
    pub allocator_url: Option<String>,

    /// Consumer URL for relayed domain events (optional; logged if unset)
    #[arg(long, env = "EVENT_WEBHOOK_URL")]
    pub event_webhook_url: Option<String>,

    /// Token symbol quoted against the oracle
    #[arg(long, env = "TOKEN_SYMBOL", default_value = "DCT")]
    pub token_symbol: String,

    /// Multiplier applied to source amounts before conversion
    #[arg(long, env = "BASE_RATE", default_value = "1.0")]
    pub base_rate: f64,

    /// Pin the swap price instead of consulting the oracle (dev mode only)
    #[arg(long, env = "PRICE_OVERRIDE")]
    pub price_override: Option<f64>,

    /// Oldest oracle snapshot a swap will quote against, in seconds
    #[arg(long, env = "MAX_PRICE_AGE_SECS", default_value = "600")]
    pub max_price_age_secs: u64,

    /// Deposit address inbound payments must have credited
    #[arg(long, env = "DEPOSIT_ADDRESS")]
    pub deposit_address: Option<String>,

    /// Outbound HTTP request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Outbox poll interval in seconds
    #[arg(long, env = "RELAY_POLL_SECS", default_value = "5")]
    pub relay_poll_secs: u64,

    /// Delivery attempts before an outbox event is parked as dead
    #[arg(long, env = "RELAY_MAX_ATTEMPTS", default_value = "8")]
    pub relay_max_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Parsed administrator token list
    pub fn admin_token_list(&self) -> Vec<String> {
        self.admin_tokens
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.oracle_url.is_none() && self.price_override.is_none() {
                return Err("ORACLE_URL is required in production mode".to_string());
            }
            if self.verifier_url.is_none() {
                return Err("VERIFIER_URL is required in production mode".to_string());
            }
            if self.burn_webhook_url.is_none() {
                return Err("BURN_WEBHOOK_URL is required in production mode".to_string());
            }
            if self.admin_token_list().is_empty() {
                return Err("ADMIN_TOKENS is required in production mode".to_string());
            }
        }

        if !self.base_rate.is_finite() || self.base_rate <= 0.0 {
            return Err(format!("BASE_RATE {} must be positive", self.base_rate));
        }
        if let Some(price) = self.price_override {
            if !price.is_finite() || price <= 0.0 {
                return Err(format!("PRICE_OVERRIDE {} must be positive", price));
            }
        }
        if self.max_price_age_secs == 0 {
            return Err("MAX_PRICE_AGE_SECS must be at least 1".to_string());
        }
        if self.relay_max_attempts == 0 {
            return Err("RELAY_MAX_ATTEMPTS must be at least 1".to_string());
        }

        Ok(())
    }
}
