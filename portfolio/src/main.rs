//! 💼 Portfolio service - wallet and holdings queries
//!
//! Answers balance/holdings/wallet-management commands from the command
//! fabric using the Solana RPC and price collaborators.

use anyhow::{Context, Result};
use log::info;
use portfolio::config::Config;
use portfolio::price::HttpPriceSource;
use portfolio::service::PortfolioService;
use portfolio::solana::HttpSolanaRpc;
use portfolio::store::PortfolioStore;
use soul_bus::RedisStreamBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.service.log_level);
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(
        PortfolioStore::open(&config.store.sqlite_path)
            .context("Failed to open portfolio store")?,
    );
    info!("✅ Store: {}", config.store.sqlite_path.display());

    let solana = Arc::new(
        HttpSolanaRpc::new(&config.rpc.solana_url).context("Failed to build Solana client")?,
    );
    let price = Arc::new(
        HttpPriceSource::new(&config.rpc.price_endpoint)
            .context("Failed to build price client")?,
    );
    let bus = Arc::new(RedisStreamBus::new(&config.bus.url).context("Failed to create bus")?);
    info!("✅ Bus: {}", config.bus.url);

    let stop = Arc::new(AtomicBool::new(false));
    let service = Arc::new(PortfolioService::new(
        config,
        bus,
        store,
        solana,
        price,
        stop.clone(),
    ));
    let consumers = service.start().await?;

    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("🛑 Shutdown signal received");

    stop.store(true, Ordering::Relaxed);
    for handle in consumers {
        handle.join().await;
    }

    info!("👋 Portfolio service stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(level);
    }
    builder.init();
}
