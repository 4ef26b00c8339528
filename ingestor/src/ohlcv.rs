//! OHLCV aggregation over streamed price points.
//!
//! Bars build per (pool, interval, bar_start) for the 5-minute and
//! 15-minute intervals. A bar completes once wall-clock passes
//! `bar_start + interval`; completed bars drain in batches and a shutdown
//! flush emits partials.

use chrono::{DateTime, TimeZone, Utc};
use soul_bus::OhlcvBar;
use std::collections::HashMap;
use std::sync::Mutex;

pub const INTERVALS_MIN: [i64; 2] = [5, 15];

#[derive(Debug, Clone)]
pub struct CompletedBar {
    pub pool_id: String,
    pub interval_minutes: i64,
    pub bar_start: DateTime<Utc>,
    pub bar: OhlcvBar,
}

#[derive(Debug, Clone)]
struct BarBuilder {
    pool_id: String,
    interval_minutes: i64,
    bar_start: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume_usd: f64,
}

impl BarBuilder {
    fn new(pool_id: &str, interval_minutes: i64, bar_start: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            interval_minutes,
            bar_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume_usd: volume,
        }
    }

    fn add_point(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume_usd += volume;
    }

    fn is_complete(&self, now: DateTime<Utc>) -> bool {
        now >= self.bar_start + chrono::Duration::minutes(self.interval_minutes)
    }

    fn to_completed(&self) -> CompletedBar {
        CompletedBar {
            pool_id: self.pool_id.clone(),
            interval_minutes: self.interval_minutes,
            bar_start: self.bar_start,
            bar: OhlcvBar {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
                volume_usd: self.volume_usd,
            },
        }
    }
}

/// Floor a timestamp to its interval boundary.
pub fn bar_start(ts: DateTime<Utc>, interval_minutes: i64) -> DateTime<Utc> {
    let step = interval_minutes * 60;
    let floored = ts.timestamp() - ts.timestamp().rem_euclid(step);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

#[derive(Default)]
pub struct OhlcvAggregator {
    active: Mutex<HashMap<(String, i64, i64), BarBuilder>>,
}

impl OhlcvAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&self, pool_id: &str, price: f64, volume_usd: f64, ts: DateTime<Utc>) {
        if price <= 0.0 || volume_usd < 0.0 {
            return;
        }
        let mut active = self.active.lock().unwrap();
        for interval in INTERVALS_MIN {
            let start = bar_start(ts, interval);
            let key = (pool_id.to_string(), interval, start.timestamp());
            active
                .entry(key)
                .and_modify(|builder| builder.add_point(price, volume_usd))
                .or_insert_with(|| BarBuilder::new(pool_id, interval, start, price, volume_usd));
        }
    }

    /// Snapshot of the newest in-progress bar per interval, attached to
    /// outgoing market updates as "5m"/"15m".
    pub fn current_bars(&self, pool_id: &str) -> HashMap<String, OhlcvBar> {
        let active = self.active.lock().unwrap();
        let mut bars = HashMap::new();
        for interval in INTERVALS_MIN {
            let newest = active
                .values()
                .filter(|b| b.pool_id == pool_id && b.interval_minutes == interval)
                .max_by_key(|b| b.bar_start);
            if let Some(builder) = newest {
                bars.insert(format!("{}m", interval), builder.to_completed().bar);
            }
        }
        bars
    }

    /// Move every bar whose window has closed out of the active set.
    pub fn drain_completed(&self, now: DateTime<Utc>) -> Vec<CompletedBar> {
        let mut active = self.active.lock().unwrap();
        let done: Vec<(String, i64, i64)> = active
            .iter()
            .filter(|(_, b)| b.is_complete(now))
            .map(|(k, _)| k.clone())
            .collect();
        done.into_iter()
            .filter_map(|key| active.remove(&key))
            .map(|b| b.to_completed())
            .collect()
    }

    /// Shutdown flush: emit everything, including partial bars.
    pub fn flush_all(&self) -> Vec<CompletedBar> {
        let mut active = self.active.lock().unwrap();
        let bars = active.values().map(|b| b.to_completed()).collect();
        active.clear();
        bars
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}
