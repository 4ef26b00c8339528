//! ⛏️ Market ingestor - pool watcher and update publisher
//!
//! Wakes on a global tick, pulls pools from the configured DEX endpoints,
//! filters by TVL/volume, aggregates OHLCV bars, publishes market updates
//! and periodically snapshots the pool cache.

use anyhow::{Context, Result};
use ingestor::config::Config;
use ingestor::dex::{DexSource, HttpDexSource};
use ingestor::service::IngestorService;
use ingestor::store::IngestStore;
use log::info;
use soul_bus::RedisStreamBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.service.log_level);
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(
        IngestStore::open(&config.store.sqlite_path).context("Failed to open ingest store")?,
    );
    info!("✅ Store: {}", config.store.sqlite_path.display());

    let bus = Arc::new(RedisStreamBus::new(&config.bus.url).context("Failed to create bus")?);
    info!("✅ Bus: {}", config.bus.url);

    let mut sources: Vec<Arc<dyn DexSource>> = Vec::new();
    for endpoint in &config.dex.endpoints {
        sources.push(Arc::new(
            HttpDexSource::new(endpoint).context("Failed to build DEX source")?,
        ));
    }
    info!("✅ DEX sources: {}", sources.len());

    let stop = Arc::new(AtomicBool::new(false));
    let service = Arc::new(IngestorService::new(
        config,
        bus,
        store,
        sources,
        stop.clone(),
    ));

    let runner = service.clone();
    let run_task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c().await.context("Signal handler failed")?;
    info!("🛑 Shutdown signal received");
    stop.store(true, Ordering::Relaxed);
    let _ = run_task.await;

    info!("👋 Ingestor stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.parse_filters(level);
    }
    builder.init();
}
