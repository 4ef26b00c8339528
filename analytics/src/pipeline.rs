//! 🧠 Analytics pipeline
//!
//! Two bus consumers feed the service: market updates land in a bounded
//! FIFO drained by a single worker thread (per-mint work is serialized, so
//! scoring needs no locks on hot state), and command requests flow to a
//! small responder task. SOL-mint updates only move the regime detector;
//! they are never scored.

use crate::config::Config;
use crate::entry_gate::EntryGate;
use crate::regime::RegimeDetector;
use crate::scoring::ConfidenceScorer;
use crate::signals::{SignalCalculator, SignalResult};
use crate::store::TokenStore;
use crate::throttle::AlertThrottle;
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use soul_bus::{
    AlertData, Band, CommandReply, CommandRequest, ConsumerHandle, MarketUpdate, MessageHandler,
    StreamBus, TokenMetadata,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Bounded FIFO between the bus consumer and the worker. A full queue
/// rejects the push so the message stays pending on the bus and is
/// redelivered once the worker catches up.
pub struct UpdateQueue {
    inner: Mutex<VecDeque<MarketUpdate>>,
    cv: Condvar,
    capacity: usize,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, update: MarketUpdate) -> bool {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(update);
        self.cv.notify_one();
        true
    }

    /// Wait up to `timeout` for work; the worker re-checks the stop flag on
    /// every timeout so shutdown stays responsive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<MarketUpdate> {
        let mut queue = self.inner.lock().unwrap();
        if queue.is_empty() {
            let (guard, _) = self.cv.wait_timeout(queue, timeout).unwrap();
            queue = guard;
        }
        queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mint-keyed cache with lookup-time TTL. Stale entries are dropped on
/// access; a full sweep runs on every Nth insert to bound memory.
pub struct TtlCache<V: Clone> {
    map: DashMap<String, (V, DateTime<Utc>)>,
    ttl: ChronoDuration,
    sweep_every: u64,
    inserts: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl_min: i64, sweep_every: u64) -> Self {
        Self {
            map: DashMap::new(),
            ttl: ChronoDuration::minutes(ttl_min),
            sweep_every: sweep_every.max(1),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        if let Some(entry) = self.map.get(key) {
            if now - entry.1 <= self.ttl {
                return Some(entry.0.clone());
            }
        }
        self.map.remove(key);
        None
    }

    pub fn insert(&self, key: String, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    pub fn insert_at(&self, key: String, value: V, now: DateTime<Utc>) {
        self.map.insert(key, (value, now));
        let n = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.sweep_every == 0 {
            self.sweep_at(now);
        }
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) {
        self.map.retain(|_, entry| now - entry.1 <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Snapshot of live entries, freshest first.
    pub fn entries_at(&self, now: DateTime<Utc>) -> Vec<(String, V, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .map
            .iter()
            .filter(|e| now - e.value().1 <= self.ttl)
            .map(|e| (e.key().clone(), e.value().0.clone(), e.value().1))
            .collect();
        entries.sort_by(|a, b| b.2.cmp(&a.2));
        entries
    }
}

/// Cached scoring outcome served by the `signals` command.
#[derive(Debug, Clone)]
pub struct CachedSignal {
    pub mint: String,
    pub symbol: String,
    pub confidence: u8,
    pub band: Band,
    pub reasons: Vec<String>,
}

pub struct AnalyticsPipeline {
    cfg: Config,
    bus: Arc<dyn StreamBus>,
    store: Arc<dyn TokenStore>,
    pub queue: Arc<UpdateQueue>,
    calculator: SignalCalculator,
    scorer: ConfidenceScorer,
    gate: EntryGate,
    pub throttle: AlertThrottle,
    pub regime: Arc<RegimeDetector>,
    market_cache: TtlCache<MarketUpdate>,
    metadata_cache: TtlCache<Option<TokenMetadata>>,
    pub signal_cache: TtlCache<CachedSignal>,
    token_list: Mutex<Option<(HashSet<String>, DateTime<Utc>)>>,
    stop: Arc<AtomicBool>,
}

impl AnalyticsPipeline {
    pub fn new(
        cfg: Config,
        bus: Arc<dyn StreamBus>,
        store: Arc<dyn TokenStore>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let thresholds = cfg.thresholds.clone();
        let throttle_cfg = cfg.throttle.clone();
        let cache = cfg.cache.clone();
        Self {
            calculator: SignalCalculator::new(thresholds.clone()),
            scorer: ConfidenceScorer::new(thresholds.clone()),
            gate: EntryGate::new(thresholds.clone()),
            throttle: AlertThrottle::new(throttle_cfg),
            regime: Arc::new(RegimeDetector::new(thresholds)),
            queue: Arc::new(UpdateQueue::new(cache.queue_capacity)),
            market_cache: TtlCache::new(cache.market_ttl_min, cache.sweep_every_n),
            metadata_cache: TtlCache::new(cache.metadata_ttl_min, cache.sweep_every_n),
            signal_cache: TtlCache::new(cache.signal_ttl_min, cache.sweep_every_n),
            token_list: Mutex::new(None),
            cfg,
            bus,
            store,
            stop,
        }
    }

    /// Handler for the market-updates stream. Malformed payloads are
    /// dropped (acked); a full queue rejects the message for redelivery.
    pub fn market_handler(self: &Arc<Self>) -> MessageHandler {
        let pipeline = self.clone();
        Arc::new(move |value| {
            let update: MarketUpdate = match serde_json::from_value(value) {
                Ok(u) => u,
                Err(e) => {
                    warn!("⚠️ Dropping malformed market update: {}", e);
                    return Ok(());
                }
            };

            if update.mint_base == pipeline.cfg.service.sol_mint {
                pipeline.track_sol_update(&update);
                return Ok(());
            }

            if pipeline.queue.push(update) {
                Ok(())
            } else {
                anyhow::bail!("update queue full, leaving message pending")
            }
        })
    }

    /// Handler for the command stream; only `signals` belongs to this
    /// service, everything else is acked untouched.
    pub fn command_handler(
        self: &Arc<Self>,
        tx: tokio::sync::mpsc::UnboundedSender<CommandRequest>,
    ) -> MessageHandler {
        Arc::new(move |value| {
            let request: CommandRequest = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!("⚠️ Dropping malformed command request: {}", e);
                    return Ok(());
                }
            };
            if request.cmd == "signals" {
                let _ = tx.send(request);
            }
            Ok(())
        })
    }

    fn track_sol_update(&self, update: &MarketUpdate) {
        // 24h change proxy from the "15m" bar; the regime detector does
        // the rest.
        let change_pct = update.m24h_pct().unwrap_or(0.0);
        self.regime.update(update.price, change_pct);
        debug!(
            "💵 SOL observation: price {:.2}, change {:.2}% ({})",
            update.price,
            change_pct,
            self.regime.regime_label()
        );
    }

    fn token_list(&self) -> HashSet<String> {
        let mut cached = self.token_list.lock().unwrap();
        let now = Utc::now();
        let refresh = ChronoDuration::minutes(self.cfg.cache.token_list_refresh_min);
        if let Some((list, loaded_at)) = cached.as_ref() {
            if now - *loaded_at <= refresh {
                return list.clone();
            }
        }
        match self.store.token_list_mints() {
            Ok(list) => {
                *cached = Some((list.clone(), now));
                list
            }
            Err(e) => {
                warn!("⚠️ Token list refresh failed: {}", e);
                cached
                    .as_ref()
                    .map(|(list, _)| list.clone())
                    .unwrap_or_default()
            }
        }
    }

    fn resolve_metadata(&self, mint: &str) -> Option<TokenMetadata> {
        if let Some(cached) = self.metadata_cache.get(mint) {
            return cached;
        }
        let loaded = match self.store.token_metadata(mint) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("⚠️ Metadata lookup failed for {}: {}", mint, e);
                None
            }
        };
        self.metadata_cache.insert(mint.to_string(), loaded.clone());
        loaded
    }

    /// Full scoring pass for one non-SOL update.
    pub async fn process_update(&self, update: MarketUpdate) {
        self.market_cache
            .insert(update.mint_base.clone(), update.clone());

        let metadata = self.resolve_metadata(&update.mint_base);
        let token_list = self.token_list();

        let mut signals = self
            .calculator
            .calculate(&update, metadata.as_ref(), &token_list);

        signals.confidence = self.scorer.calculate_confidence(&signals);
        signals.confidence = self
            .scorer
            .apply_risk_adjustment(signals.confidence, self.regime.is_risk_on());
        signals.entry_confirmed = self.gate.check_entry_conditions(&update, &signals);
        signals.net_edge_ok = self.gate.check_net_edge(&update);
        signals.band =
            self.scorer
                .determine_band(signals.confidence, signals.entry_confirmed, signals.net_edge_ok);

        self.signal_cache.insert(
            update.mint_base.clone(),
            CachedSignal {
                mint: update.mint_base.clone(),
                symbol: update.symbol.clone(),
                confidence: signals.confidence,
                band: signals.band,
                reasons: signals.reasons.clone(),
            },
        );

        self.maybe_emit_alert(&update, &signals).await;
    }

    /// Watch-band results never alert; everything else passes the throttle
    /// and records itself only after a successful publish.
    async fn maybe_emit_alert(&self, update: &MarketUpdate, signals: &SignalResult) {
        if signals.band == Band::Watch {
            return;
        }
        if self.throttle.should_throttle(&update.mint_base, signals.band) {
            return;
        }

        let alert = self.build_alert(update, signals);
        let payload = match serde_json::to_value(&alert) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ Alert serialization failed: {}", e);
                return;
            }
        };

        match self.bus.publish(&self.cfg.bus.stream_alerts, &payload).await {
            Ok(()) => {
                self.throttle.record_alert(&update.mint_base, signals.band);
                info!(
                    "🚨 Published {} alert for {}: confidence {}, reasons: {}",
                    signals.band,
                    update.symbol,
                    signals.confidence,
                    signals.reasons.join(", ")
                );
            }
            Err(e) => {
                error!("❌ Failed to publish alert for {}: {}", update.symbol, e);
            }
        }
    }

    fn build_alert(&self, update: &MarketUpdate, signals: &SignalResult) -> AlertData {
        let t = &self.cfg.thresholds;
        let tranche =
            t.default_deployed_pct / t.max_positions as f64 * signals.confidence as f64 / 100.0;
        let sol_path = if update.route.hops <= 1 {
            "direct".to_string()
        } else {
            format!("{} hops", update.route.hops)
        };
        AlertData {
            severity: signals.band,
            mint: update.mint_base.clone(),
            symbol: update.symbol.clone(),
            price: update.price,
            confidence: signals.confidence,
            lines: signals.reasons.clone(),
            plan: format!(
                "entry tranche ~{:.1}% of portfolio (cap {:.0}% deployed)",
                tranche, t.max_deployed_pct
            ),
            sol_path,
            est_impact_pct: update.impact_1pct_pct,
            ts: Utc::now(),
        }
    }

    /// Answer a `signals` command from the cache.
    pub async fn handle_command(&self, request: CommandRequest) {
        let now = Utc::now();
        let filter = request.arg_str("window").or_else(|| request.arg_str("mint"));

        let mut items: Vec<CachedSignal> = self
            .signal_cache
            .entries_at(now)
            .into_iter()
            .map(|(_, signal, _)| signal)
            .collect();

        // A mint-looking argument narrows to that mint; window arguments
        // ("60m") keep the freshest set.
        if let Some(ref f) = filter {
            if items.iter().any(|s| &s.mint == f || &s.symbol == f) {
                items.retain(|s| &s.mint == f || &s.symbol == f);
            }
        }
        items.truncate(10);

        let reply = if items.is_empty() {
            CommandReply::ok(&request.corr_id, "No recent signals cached.")
        } else {
            let mut message = String::from("📡 Recent signals\n");
            for item in &items {
                message.push_str(&format!(
                    "{} — {} ({}): {}\n",
                    item.symbol,
                    item.confidence,
                    item.band,
                    item.reasons
                        .iter()
                        .take(3)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
            let data = serde_json::json!(items
                .iter()
                .map(|s| serde_json::json!({
                    "mint": s.mint,
                    "symbol": s.symbol,
                    "confidence": s.confidence,
                    "band": s.band,
                }))
                .collect::<Vec<_>>());
            CommandReply::ok(&request.corr_id, message).with_data(data)
        };

        let payload = match serde_json::to_value(&reply) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ Reply serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(&self.cfg.bus.stream_replies, &payload).await {
            error!(
                "❌ Failed to publish reply for {}: {}",
                request.corr_id, e
            );
        }
    }

    /// Start the consumers, the responder task and the worker thread.
    /// Returns the consumer handles and the worker join handle for the
    /// shutdown sequence: stop consumers -> drain FIFO -> join worker.
    pub async fn start(
        self: &Arc<Self>,
    ) -> Result<(Vec<ConsumerHandle>, std::thread::JoinHandle<()>)> {
        let consumer = soul_bus::consumer_name("analytics");
        let mut handles = Vec::new();

        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_market,
                    &self.cfg.bus.group,
                    &consumer,
                    self.market_handler(),
                )
                .await?,
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_requests,
                    &self.cfg.bus.group,
                    &consumer,
                    self.command_handler(tx),
                )
                .await?,
        );

        let responder = self.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if responder.stop.load(Ordering::Relaxed) {
                    break;
                }
                responder.handle_command(request).await;
            }
        });

        let worker = self.spawn_worker();
        info!("✅ Analytics pipeline started (consumer {})", consumer);
        Ok((handles, worker))
    }

    /// Single worker thread: drains the FIFO, suspends 1s on empty, and
    /// drains whatever is left once the stop flag is set.
    pub fn spawn_worker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let pipeline = self.clone();
        let rt = tokio::runtime::Handle::current();
        std::thread::spawn(move || {
            info!("⚙️ Analytics worker started");
            loop {
                let stop = pipeline.stop.load(Ordering::Relaxed);
                match pipeline.queue.pop_timeout(Duration::from_secs(1)) {
                    Some(update) => {
                        rt.block_on(pipeline.process_update(update));
                    }
                    None if stop => break,
                    None => {}
                }
            }
            info!("🛑 Analytics worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bounded_push() {
        let queue = UpdateQueue::new(2);
        let update = sample_update("A");
        assert!(queue.push(update.clone()));
        assert!(queue.push(update.clone()));
        assert!(!queue.push(update));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_queue_pop_timeout_on_empty() {
        let queue = UpdateQueue::new(4);
        let start = std::time::Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_ttl_cache_expires_on_access() {
        let cache: TtlCache<u32> = TtlCache::new(10, 100);
        let start = Utc::now();
        cache.insert_at("k".to_string(), 7, start);
        assert_eq!(cache.get_at("k", start + ChronoDuration::minutes(5)), Some(7));
        assert_eq!(cache.get_at("k", start + ChronoDuration::minutes(11)), None);
        // The stale entry was removed by the access itself.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_ttl_cache_sweeps_every_nth_insert() {
        let cache: TtlCache<u32> = TtlCache::new(10, 4);
        let start = Utc::now();
        for i in 0..3 {
            cache.insert_at(format!("old{}", i), i, start);
        }
        // Fourth insert happens past the TTL and triggers the sweep.
        cache.insert_at("fresh".to_string(), 9, start + ChronoDuration::minutes(20));
        assert_eq!(cache.len(), 1);
    }

    fn sample_update(mint: &str) -> MarketUpdate {
        use soul_bus::RouteInfo;
        MarketUpdate {
            pool_id: "p".to_string(),
            mint_base: mint.to_string(),
            mint_quote: "q".to_string(),
            symbol: "SYM".to_string(),
            price: 1.0,
            liq_usd: 1000.0,
            vol24h_usd: 1000.0,
            spread_pct: 0.1,
            impact_1pct_pct: 0.1,
            age_hours: 100.0,
            route: RouteInfo {
                ok: true,
                hops: 1,
                deviation_pct: 0.1,
            },
            bars: Default::default(),
            ts: Utc::now(),
        }
    }
}
