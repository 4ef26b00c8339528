//! Configuration for the market ingestor.

use anyhow::{Context, Result};
use soul_bus::streams;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub dex: DexConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream_market: String,
}

#[derive(Debug, Clone)]
pub struct DexConfig {
    /// Comma-separated pool endpoints; each becomes one source.
    pub endpoints: Vec<String>,
    pub min_tvl_threshold: f64,
    pub min_volume_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_min: i64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
    pub snapshot_persist_minutes: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    pub global_tick_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        let endpoints = get_env_string("DEX_ENDPOINTS", "")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            bus: BusConfig {
                url: get_env_string("BUS_URL", "redis://127.0.0.1:6379")?,
                stream_market: get_env_string("STREAM_MARKET", streams::MARKET_UPDATES)?,
            },
            dex: DexConfig {
                endpoints,
                min_tvl_threshold: get_env_f64("MIN_TVL_THRESHOLD", 25_000.0)?,
                min_volume_threshold: get_env_f64("MIN_VOLUME_THRESHOLD", 50_000.0)?,
            },
            cache: CacheConfig {
                max_size: get_env_usize("POOL_CACHE_MAX_SIZE", 5_000)?,
                ttl_min: get_env_i64("POOL_CACHE_TTL_MIN", 30)?,
            },
            store: StoreConfig {
                sqlite_path: PathBuf::from(get_env_string("SQLITE_PATH", "./data/soulscout.db")?),
                snapshot_persist_minutes: get_env_u64("SNAPSHOT_PERSIST_MINUTES", 10)?,
            },
            service: ServiceConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
                global_tick_seconds: get_env_u64("GLOBAL_TICK_SECONDS", 30)?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.dex.endpoints.is_empty() {
            anyhow::bail!("DEX_ENDPOINTS must name at least one endpoint");
        }
        if self.service.global_tick_seconds == 0 {
            anyhow::bail!("GLOBAL_TICK_SECONDS must be > 0");
        }
        if self.cache.max_size == 0 {
            anyhow::bail!("POOL_CACHE_MAX_SIZE must be > 0");
        }
        if self.store.snapshot_persist_minutes == 0 {
            anyhow::bail!("SNAPSHOT_PERSIST_MINUTES must be > 0");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn get_env_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(raw) => raw.parse().context(format!("Invalid {} value", key)),
        Err(_) => Ok(default),
    }
}

fn get_env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw.parse().context(format!("Invalid {} value", key)),
        Err(_) => Ok(default),
    }
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw.parse().context(format!("Invalid {} value", key)),
        Err(_) => Ok(default),
    }
}

fn get_env_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw.parse().context(format!("Invalid {} value", key)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_endpoints_rejected() {
        let config = Config::from_env().unwrap();
        if config.dex.endpoints.is_empty() {
            assert!(config.validate().is_err());
        }
    }
}
