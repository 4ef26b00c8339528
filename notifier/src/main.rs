//! 🔔 Notifier service - alert policy layer
//!
//! Sits between the analytics alert stream and the chat gateway: applies
//! mute, global-throttle and dedup gates, audits every decision, and
//! answers status/mute commands.

use anyhow::{Context, Result};
use log::info;
use notifier::audit::AuditLogger;
use notifier::config::Config;
use notifier::service::NotifierService;
use soul_bus::RedisStreamBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.service.log_level);
    config.validate().context("Invalid configuration")?;

    let audit = Arc::new(
        AuditLogger::open(&config.store.sqlite_path).context("Failed to open audit store")?,
    );
    info!("✅ Audit store: {}", config.store.sqlite_path.display());

    let bus = Arc::new(RedisStreamBus::new(&config.bus.url).context("Failed to create bus")?);
    info!("✅ Bus: {}", config.bus.url);

    let stop = Arc::new(AtomicBool::new(false));
    let service = Arc::new(NotifierService::new(config, bus, audit, stop.clone()));
    let consumers = service.start().await?;

    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("🛑 Shutdown signal received");

    stop.store(true, Ordering::Relaxed);
    for handle in consumers {
        handle.join().await;
    }

    info!("👋 Notifier service stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(level);
    }
    builder.init();
}
