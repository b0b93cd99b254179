//! External collaborator seams
//!
//! Every outbound dependency of the engine sits behind an async trait:
//! price oracle, payment verifier, burn webhook, notification channel,
//! allocator bridge and admin resolver. Production wiring uses the HTTP
//! implementations; dev mode and tests swap in the local ones.

pub mod admin;
pub mod allocator;
pub mod burn;
pub mod notify;
pub mod oracle;
pub mod verifier;

pub use admin::{AdminResolver, StaticAdminResolver};
pub use allocator::{AllocatorBridge, CashOutReceipt, CashOutRequest, HttpAllocatorBridge};
pub use burn::{BurnReceipt, BurnWebhook, HttpBurnWebhook, LogBurnWebhook};
pub use notify::{HttpNotificationChannel, LogNotificationChannel, NotificationChannel};
pub use oracle::{FixedPriceOracle, HttpPriceOracle, PriceOracle, PriceSnapshot};
pub use verifier::{
    AcceptAllVerifier, HttpPaymentVerifier, PaymentVerifier, VerificationOutcome,
    VerificationRequest,
};
