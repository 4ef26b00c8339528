//! ⛏️ Ingestor tick loop: fetch -> filter -> cache -> publish -> persist.

use crate::config::Config;
use crate::dex::{DexSource, PoolInfo};
use crate::ohlcv::OhlcvAggregator;
use crate::pool_cache::PoolCache;
use crate::store::IngestStore;
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use soul_bus::{MarketUpdate, StreamBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub struct IngestorService {
    cfg: Config,
    bus: Arc<dyn StreamBus>,
    store: Arc<IngestStore>,
    sources: Vec<Arc<dyn DexSource>>,
    pub pool_cache: PoolCache,
    pub ohlcv: OhlcvAggregator,
    last_snapshot: Mutex<Instant>,
    stop: Arc<AtomicBool>,
}

impl IngestorService {
    pub fn new(
        cfg: Config,
        bus: Arc<dyn StreamBus>,
        store: Arc<IngestStore>,
        sources: Vec<Arc<dyn DexSource>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let pool_cache = PoolCache::new(
            cfg.cache.max_size,
            Duration::from_secs(cfg.cache.ttl_min as u64 * 60),
        );
        Self {
            cfg,
            bus,
            store,
            sources,
            pool_cache,
            ohlcv: OhlcvAggregator::new(),
            last_snapshot: Mutex::new(Instant::now()),
            stop,
        }
    }

    /// One scheduled tick. A failed endpoint only costs its own pools.
    pub async fn tick(&self) {
        let started = Instant::now();
        let mut fetched = Vec::new();

        for source in &self.sources {
            match source.fetch_pools().await {
                Ok(mut pools) => {
                    debug!("Fetched {} pools from {}", pools.len(), source.name());
                    fetched.append(&mut pools);
                }
                Err(e) => {
                    warn!("⚠️ {} fetch failed this tick: {}", source.name(), e);
                }
            }
        }
        info!("Fetched {} pools from {} sources", fetched.len(), self.sources.len());

        let retained: Vec<PoolInfo> = fetched
            .into_iter()
            .filter(|p| {
                p.tvl_usd >= self.cfg.dex.min_tvl_threshold
                    || p.volume_24h_usd >= self.cfg.dex.min_volume_threshold
            })
            .collect();
        info!("{} pools meet threshold criteria", retained.len());

        let now = Utc::now();
        let mut published = 0usize;
        for pool in &retained {
            let changed = self.pool_cache.check_and_update(pool.clone());
            if changed {
                debug!("Pool {} changed significantly", pool.pool_id);
            }

            self.ohlcv
                .add_point(&pool.pool_id, pool.price, pool.volume_24h_usd / 48.0, now);

            let update = self.build_market_update(pool);
            match serde_json::to_value(&update) {
                Ok(payload) => {
                    if let Err(e) = self.bus.publish(&self.cfg.bus.stream_market, &payload).await {
                        error!("❌ Failed to publish update for {}: {}", pool.pool_id, e);
                    } else {
                        published += 1;
                    }
                }
                Err(e) => error!("❌ Update serialization failed: {}", e),
            }
        }

        self.persist_completed_bars(now);
        self.snapshot_if_due();

        info!(
            "Tick complete: {} published in {} ms",
            published,
            started.elapsed().as_millis()
        );
    }

    fn build_market_update(&self, pool: &PoolInfo) -> MarketUpdate {
        MarketUpdate {
            pool_id: pool.pool_id.clone(),
            mint_base: pool.mint_base.clone(),
            mint_quote: pool.mint_quote.clone(),
            symbol: pool.symbol.clone(),
            price: pool.price,
            liq_usd: pool.tvl_usd,
            vol24h_usd: pool.volume_24h_usd,
            spread_pct: pool.spread_pct,
            impact_1pct_pct: pool.impact_1pct_pct,
            age_hours: pool.age_hours,
            route: pool.route,
            bars: self.ohlcv.current_bars(&pool.pool_id),
            ts: Utc::now(),
        }
    }

    fn persist_completed_bars(&self, now: chrono::DateTime<Utc>) {
        let completed = self.ohlcv.drain_completed(now);
        if completed.is_empty() {
            return;
        }
        match self.store.save_bars(&completed) {
            Ok(n) => debug!("Persisted {} completed bars", n),
            Err(e) => error!("❌ Failed to persist bars: {}", e),
        }
    }

    fn snapshot_if_due(&self) {
        let mut last = self.last_snapshot.lock().unwrap();
        let due = last.elapsed() >= Duration::from_secs(self.cfg.store.snapshot_persist_minutes * 60);
        if !due {
            return;
        }
        let pools = self.pool_cache.all_pools();
        match self.store.save_pool_snapshot(&pools) {
            Ok(n) => {
                info!("💾 Saved pool snapshot ({} pools)", n);
                *last = Instant::now();
            }
            Err(e) => error!("❌ Snapshot failed: {}", e),
        }
    }

    /// Tick loop with a stop-aware sleep between rounds.
    pub async fn run(&self) -> Result<()> {
        info!(
            "⛏️ Ingestor started, tick every {}s",
            self.cfg.service.global_tick_seconds
        );
        while !self.stop.load(Ordering::Relaxed) {
            self.tick().await;

            let wake_at =
                Instant::now() + Duration::from_secs(self.cfg.service.global_tick_seconds);
            while !self.stop.load(Ordering::Relaxed) && Instant::now() < wake_at {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Final snapshot plus a flush of partial bars.
    pub fn shutdown(&self) {
        let pools = self.pool_cache.all_pools();
        if let Err(e) = self.store.save_pool_snapshot(&pools) {
            error!("❌ Final snapshot failed: {}", e);
        } else {
            info!("💾 Final snapshot saved ({} pools)", pools.len());
        }

        let partials = self.ohlcv.flush_all();
        if !partials.is_empty() {
            if let Err(e) = self.store.save_bars(&partials) {
                error!("❌ Final bar flush failed: {}", e);
            } else {
                info!("💾 Flushed {} partial bars", partials.len());
            }
        }
        info!("🛑 Ingestor stopped");
    }
}
