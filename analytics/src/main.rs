//! 🧠 Analytics service - signal and alert engine
//!
//! Consumes market updates, derives signals and confidence bands, emits
//! throttled alerts, and answers `signals` command queries.

use analytics::config::Config;
use analytics::pipeline::AnalyticsPipeline;
use analytics::store::SqliteTokenStore;
use anyhow::{Context, Result};
use log::{error, info};
use soul_bus::RedisStreamBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.service.log_level);
    config.validate().context("Invalid configuration")?;
    print_banner(&config);

    let store = Arc::new(
        SqliteTokenStore::open(&config.store.sqlite_path)
            .context("Failed to open token store")?,
    );
    info!("✅ Store: {}", config.store.sqlite_path.display());

    let bus = Arc::new(RedisStreamBus::new(&config.bus.url).context("Failed to create bus")?);
    info!("✅ Bus: {}", config.bus.url);

    let stop = Arc::new(AtomicBool::new(false));
    let pipeline = Arc::new(AnalyticsPipeline::new(
        config.clone(),
        bus,
        store,
        stop.clone(),
    ));

    let (consumers, worker) = pipeline.start().await?;

    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("🛑 Shutdown signal received");

    // Stop consumers first so the FIFO stops filling, then let the worker
    // drain what is queued before joining it.
    stop.store(true, Ordering::Relaxed);
    for handle in consumers {
        handle.join().await;
    }
    if let Err(e) = tokio::task::spawn_blocking(move || worker.join()).await {
        error!("❌ Worker join failed: {:?}", e);
    }

    info!("👋 Analytics service stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(level);
    }
    builder.init();
}

fn print_banner(config: &Config) {
    info!("==========================================");
    info!("  SoulScout Analytics");
    info!("==========================================");
    info!("  Market stream:  {}", config.bus.stream_market);
    info!("  Alert stream:   {}", config.bus.stream_alerts);
    info!(
        "  Bands: heads-up {}..{}, actionable {}+, conviction {}+",
        config.thresholds.headsup_min,
        config.thresholds.headsup_max,
        config.thresholds.actionable_base_threshold,
        config.thresholds.high_conviction_min
    );
    info!("==========================================");
}
