//! Paymaster - payment settlement and fund-cycle reconciliation engine

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paymaster::{
    config::Args,
    db::SettlementDb,
    events::{EventRelay, EventSink, LogSink, RelayConfig, WebhookSink},
    http::HttpServer,
    payment::SubscriptionManager,
    pricing::{SwapConfig, SwapExecutor},
    services::{
        AcceptAllVerifier, AdminResolver, AllocatorBridge, BurnWebhook, FixedPriceOracle,
        HttpAllocatorBridge, HttpBurnWebhook, HttpNotificationChannel, HttpPaymentVerifier,
        HttpPriceOracle, LogBurnWebhook, LogNotificationChannel, NotificationChannel,
        PaymentVerifier, PriceOracle, StaticAdminResolver,
    },
    settlement::FundCycleEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("paymaster={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Paymaster - Settlement Engine");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Ledger: {:?}", args.db_path);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Token symbol: {}", args.token_symbol);
    info!("Admin tokens: {}", args.admin_token_list().len());
    info!("======================================");

    // The ledger is non-negotiable: fail fast if it cannot open
    let db = match SettlementDb::open(&args.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open ledger: {}", e);
            std::process::exit(1);
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(args.request_timeout_ms))
        .build()
        .expect("reqwest client");

    // Collaborators: HTTP-backed in production, local fallbacks in dev mode
    let oracle: Arc<dyn PriceOracle> = match &args.oracle_url {
        Some(url) => Arc::new(HttpPriceOracle::new(client.clone(), url.clone())),
        None => {
            let price = args.price_override.unwrap_or(1.0);
            warn!(price = price, "No oracle configured, using fixed price (dev mode)");
            Arc::new(FixedPriceOracle::new(price))
        }
    };

    let verifier: Arc<dyn PaymentVerifier> = match &args.verifier_url {
        Some(url) => Arc::new(HttpPaymentVerifier::new(client.clone(), url.clone())),
        None => {
            warn!("No verifier configured, accepting all payments (dev mode)");
            Arc::new(AcceptAllVerifier)
        }
    };

    let burner: Arc<dyn BurnWebhook> = match &args.burn_webhook_url {
        Some(url) => Arc::new(HttpBurnWebhook::new(client.clone(), url.clone())),
        None => {
            warn!("No burn webhook configured, logging burns (dev mode)");
            Arc::new(LogBurnWebhook)
        }
    };

    let notifier: Arc<dyn NotificationChannel> = match &args.notify_url {
        Some(url) => Arc::new(HttpNotificationChannel::new(client.clone(), url.clone())),
        None => Arc::new(LogNotificationChannel),
    };

    let allocator: Option<Arc<dyn AllocatorBridge>> = args
        .allocator_url
        .as_ref()
        .map(|url| {
            Arc::new(HttpAllocatorBridge::new(client.clone(), url.clone()))
                as Arc<dyn AllocatorBridge>
        });

    let admin: Arc<dyn AdminResolver> = Arc::new(StaticAdminResolver::new(args.admin_token_list()));

    let swaps = Arc::new(SwapExecutor::new(
        SwapConfig {
            symbol: args.token_symbol.clone(),
            base_rate: args.base_rate,
            max_snapshot_age: Duration::from_secs(args.max_price_age_secs),
            price_override: args.price_override,
        },
        oracle.clone(),
    ));

    let payments = Arc::new(SubscriptionManager::new(
        db.clone(),
        verifier,
        swaps,
        burner,
        args.deposit_address.clone(),
    ));

    let cycles = Arc::new(FundCycleEngine::new(
        db.clone(),
        admin,
        notifier,
        allocator,
        oracle,
        args.token_symbol.clone(),
    ));

    // Outbox relay: deliver to the configured consumer, or just log
    let sink: Arc<dyn EventSink> = match &args.event_webhook_url {
        Some(url) => Arc::new(WebhookSink::new(client.clone(), url.clone())),
        None => Arc::new(LogSink),
    };
    let relay = EventRelay::new(
        db.clone(),
        sink,
        RelayConfig {
            poll_interval: Duration::from_secs(args.relay_poll_secs),
            max_attempts: args.relay_max_attempts,
            ..Default::default()
        },
    );
    let _relay_handle = relay.spawn();

    let server = Arc::new(HttpServer::new(args.listen, payments, cycles, db));
    server.run().await?;

    Ok(())
}
