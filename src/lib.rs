//! Paymaster - payment settlement and fund-cycle reconciliation engine
//!
//! Two orchestrators over one SQLite ledger:
//!
//! - **SubscriptionManager**: turns a verified inbound blockchain payment
//!   into subscription and stake records via deterministic splitting,
//!   oracle-priced swaps and token burn.
//! - **FundCycleEngine**: closes an investment pool's accounting period -
//!   profit-share payouts, reinvestment, performance fees, loss absorption -
//!   and opens the next period with carried-over balances.
//!
//! External collaborators (oracle, verifier, burner, notifier, allocator
//! bridge, admin resolver) sit behind narrow async traits in [`services`].
//! Domain events go through a transactional outbox drained by the relay in
//! [`events`].

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod payment;
pub mod plans;
pub mod pricing;
pub mod services;
pub mod settlement;

pub use config::Args;
pub use db::SettlementDb;
pub use error::{EngineError, Result};
pub use http::HttpServer;
pub use payment::SubscriptionManager;
pub use settlement::FundCycleEngine;
