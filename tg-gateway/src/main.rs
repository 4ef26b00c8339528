//! 📱 Telegram gateway - the chat edge of the platform
//!
//! Polls Telegram, authenticates and rate-limits senders, answers local
//! commands, forwards the rest over the command fabric, and relays
//! notifier alerts back to the owner chat.

use anyhow::{Context, Result};
use log::info;
use soul_bus::RedisStreamBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tg_gateway::config::Config;
use tg_gateway::gateway::Gateway;
use tg_gateway::telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.service.log_level);
    config.validate().context("Invalid configuration")?;

    let telegram = Arc::new(
        TelegramClient::new(
            config.telegram.bot_token.clone(),
            config.telegram.poll_timeout_sec,
        )
        .context("Failed to build Telegram client")?,
    );
    let bus = Arc::new(RedisStreamBus::new(&config.bus.url).context("Failed to create bus")?);
    info!("✅ Bus: {}", config.bus.url);

    let stop = Arc::new(AtomicBool::new(false));
    let gateway = Arc::new(Gateway::new(config, bus, telegram, stop.clone()));
    let consumers = gateway.start().await?;

    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("🛑 Shutdown signal received");

    stop.store(true, Ordering::Relaxed);
    for handle in consumers {
        handle.join().await;
    }

    info!("👋 Gateway stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(level);
    }
    builder.init();
}
