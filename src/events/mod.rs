//! Domain events
//!
//! Three things the outside world cares about: a payment settled, tokens
//! were burned, a cycle closed. Events are appended to the outbox in the
//! same transaction as the ledger change and pushed out by the relay.

pub mod relay;

pub use relay::{EventRelay, EventSink, LogSink, RelayConfig, WebhookSink};

use serde_json::{json, Value};

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A payment was verified, split, swapped and persisted
    PaymentRecorded {
        subscription_id: String,
        wallet_address: String,
        plan: String,
        tx_hash: String,
        gross_amount: f64,
        operations_amount: f64,
        auto_invest_amount: f64,
        burn_amount: f64,
        auto_invest_tokens: f64,
        burn_tokens: f64,
    },
    /// The burn bucket of a payment was destroyed on chain
    BurnExecuted {
        tx_hash: String,
        burn_tx_hash: String,
        amount_tokens: f64,
    },
    /// A fund cycle was settled and its successor opened
    CycleSettled {
        cycle_id: String,
        cycle_number: i64,
        profit: f64,
        mode: String,
        investor_count: usize,
        total_payout: f64,
        total_reinvested: f64,
        total_fees: f64,
        next_cycle_id: String,
        next_cycle_number: i64,
    },
}

impl DomainEvent {
    /// Routing key stored alongside the payload
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::PaymentRecorded { .. } => "payment.recorded",
            DomainEvent::BurnExecuted { .. } => "burn.executed",
            DomainEvent::CycleSettled { .. } => "cycle.settled",
        }
    }

    /// JSON body delivered to sinks
    pub fn payload(&self) -> Value {
        match self {
            DomainEvent::PaymentRecorded {
                subscription_id,
                wallet_address,
                plan,
                tx_hash,
                gross_amount,
                operations_amount,
                auto_invest_amount,
                burn_amount,
                auto_invest_tokens,
                burn_tokens,
            } => json!({
                "subscription_id": subscription_id,
                "wallet_address": wallet_address,
                "plan": plan,
                "tx_hash": tx_hash,
                "gross_amount": gross_amount,
                "operations_amount": operations_amount,
                "auto_invest_amount": auto_invest_amount,
                "burn_amount": burn_amount,
                "auto_invest_tokens": auto_invest_tokens,
                "burn_tokens": burn_tokens,
            }),
            DomainEvent::BurnExecuted {
                tx_hash,
                burn_tx_hash,
                amount_tokens,
            } => json!({
                "tx_hash": tx_hash,
                "burn_tx_hash": burn_tx_hash,
                "amount_tokens": amount_tokens,
            }),
            DomainEvent::CycleSettled {
                cycle_id,
                cycle_number,
                profit,
                mode,
                investor_count,
                total_payout,
                total_reinvested,
                total_fees,
                next_cycle_id,
                next_cycle_number,
            } => json!({
                "cycle_id": cycle_id,
                "cycle_number": cycle_number,
                "profit": profit,
                "mode": mode,
                "investor_count": investor_count,
                "total_payout": total_payout,
                "total_reinvested": total_reinvested,
                "total_fees": total_fees,
                "next_cycle_id": next_cycle_id,
                "next_cycle_number": next_cycle_number,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let event = DomainEvent::PaymentRecorded {
            subscription_id: "s1".into(),
            wallet_address: "0xW".into(),
            plan: "vip".into(),
            tx_hash: "0xT".into(),
            gross_amount: 100.0,
            operations_amount: 60.0,
            auto_invest_amount: 30.0,
            burn_amount: 10.0,
            auto_invest_tokens: 15.0,
            burn_tokens: 5.0,
        };
        assert_eq!(event.event_type(), "payment.recorded");
        assert_eq!(event.payload()["tx_hash"], "0xT");
        assert_eq!(event.payload()["auto_invest_tokens"], 15.0);
    }

    #[test]
    fn test_cycle_settled_payload() {
        let event = DomainEvent::CycleSettled {
            cycle_id: "c1".into(),
            cycle_number: 1,
            profit: 600.0,
            mode: "profit".into(),
            investor_count: 3,
            total_payout: 384.0,
            total_reinvested: 96.0,
            total_fees: 120.0,
            next_cycle_id: "c2".into(),
            next_cycle_number: 2,
        };
        assert_eq!(event.event_type(), "cycle.settled");
        let payload = event.payload();
        assert_eq!(payload["mode"], "profit");
        assert_eq!(payload["next_cycle_number"], 2);
    }
}
