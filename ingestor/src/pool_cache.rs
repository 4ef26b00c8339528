//! LRU pool cache with per-entry TTL and significant-change detection.

use crate::dex::PoolInfo;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const TVL_CHANGE_THRESHOLD: f64 = 0.10;
const VOLUME_CHANGE_THRESHOLD: f64 = 0.20;

struct CacheEntry {
    pool: PoolInfo,
    inserted: Instant,
    /// Monotonic touch stamp; the smallest stamp is the LRU victim.
    touched: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

pub struct PoolCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
    ttl: Duration,
}

impl PoolCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
            }),
            max_size,
            ttl,
        }
    }

    /// Insert or refresh, evicting the LRU entry at capacity. Returns true
    /// when the pool is new or changed significantly (TVL ±10%, volume
    /// ±20%, either side crossing away from zero).
    pub fn check_and_update(&self, pool: PoolInfo) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let stamp = inner.clock;

        let changed = match inner.entries.get(&pool.pool_id) {
            None => true,
            Some(entry) => Self::significantly_changed(&entry.pool, &pool),
        };

        if !inner.entries.contains_key(&pool.pool_id) && inner.entries.len() >= self.max_size {
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(id, _)| id.clone())
            {
                inner.entries.remove(&victim);
            }
        }

        inner.entries.insert(
            pool.pool_id.clone(),
            CacheEntry {
                pool,
                inserted: Instant::now(),
                touched: stamp,
            },
        );
        changed
    }

    fn significantly_changed(old: &PoolInfo, new: &PoolInfo) -> bool {
        let relative = |old_v: f64, new_v: f64, threshold: f64| {
            if old_v > 1e-9 {
                (new_v - old_v).abs() / old_v > threshold
            } else {
                new_v > 1.0
            }
        };
        relative(old.tvl_usd, new.tvl_usd, TVL_CHANGE_THRESHOLD)
            || relative(old.volume_24h_usd, new.volume_24h_usd, VOLUME_CHANGE_THRESHOLD)
    }

    pub fn get(&self, pool_id: &str) -> Option<PoolInfo> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let stamp = inner.clock;
        let ttl = self.ttl;

        let mut expired = false;
        let mut found = None;
        if let Some(entry) = inner.entries.get_mut(pool_id) {
            if entry.inserted.elapsed() <= ttl {
                entry.touched = stamp;
                found = Some(entry.pool.clone());
            } else {
                expired = true;
            }
        }
        if expired {
            inner.entries.remove(pool_id);
        }
        found
    }

    /// Every live entry, for the snapshot writer.
    pub fn all_pools(&self) -> Vec<PoolInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .values()
            .filter(|e| e.inserted.elapsed() <= self.ttl)
            .map(|e| e.pool.clone())
            .collect()
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| e.inserted.elapsed() <= ttl);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soul_bus::RouteInfo;

    fn pool(id: &str, tvl: f64, volume: f64) -> PoolInfo {
        PoolInfo {
            pool_id: id.to_string(),
            dex: "testdex".to_string(),
            mint_base: format!("{}-mint", id),
            mint_quote: "quote".to_string(),
            symbol: id.to_uppercase(),
            price: 1.0,
            reserve_base: 100.0,
            reserve_quote: 100.0,
            tvl_usd: tvl,
            volume_24h_usd: volume,
            spread_pct: 0.5,
            impact_1pct_pct: 0.3,
            age_hours: 100.0,
            route: RouteInfo {
                ok: true,
                hops: 1,
                deviation_pct: 0.1,
            },
        }
    }

    #[test]
    fn test_new_pool_counts_as_changed() {
        let cache = PoolCache::new(10, Duration::from_secs(60));
        assert!(cache.check_and_update(pool("a", 100_000.0, 50_000.0)));
        // Identical refresh is not a significant change.
        assert!(!cache.check_and_update(pool("a", 100_000.0, 50_000.0)));
    }

    #[test]
    fn test_significant_tvl_move_detected() {
        let cache = PoolCache::new(10, Duration::from_secs(60));
        cache.check_and_update(pool("a", 100_000.0, 50_000.0));
        assert!(!cache.check_and_update(pool("a", 105_000.0, 50_000.0)));
        assert!(cache.check_and_update(pool("a", 120_000.0, 50_000.0)));
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = PoolCache::new(2, Duration::from_secs(60));
        cache.check_and_update(pool("a", 1e5, 5e4));
        cache.check_and_update(pool("b", 1e5, 5e4));
        // Touch "a" so "b" becomes the LRU victim.
        cache.get("a");
        cache.check_and_update(pool("c", 1e5, 5e4));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_expiry_on_get_and_sweep() {
        let cache = PoolCache::new(10, Duration::from_millis(40));
        cache.check_and_update(pool("a", 1e5, 5e4));
        assert!(cache.get("a").is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("a").is_none());

        cache.check_and_update(pool("b", 1e5, 5e4));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_all_pools_excludes_expired() {
        let cache = PoolCache::new(10, Duration::from_millis(40));
        cache.check_and_update(pool("a", 1e5, 5e4));
        std::thread::sleep(Duration::from_millis(60));
        cache.check_and_update(pool("b", 1e5, 5e4));
        let pools = cache.all_pools();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].pool_id, "b");
    }
}
