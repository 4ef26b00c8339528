//! Configuration for the analytics service.
//!
//! Loaded from environment variables (via .env) with validated defaults.
//! Bad values that would corrupt scoring abort startup.

use anyhow::{Context, Result};
use soul_bus::{streams, Band};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub thresholds: Thresholds,
    pub throttle: ThrottleConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream_market: String,
    pub stream_alerts: String,
    pub stream_requests: String,
    pub stream_replies: String,
    pub group: String,
}

/// Scoring and gating thresholds; defaults follow production tuning.
#[derive(Debug, Clone)]
pub struct Thresholds {
    // Hard gates
    pub min_liquidity_actionable: f64,
    pub min_liquidity_headsup: f64,
    pub min_volume_actionable: f64,
    pub min_volume_headsup: f64,
    pub max_impact_pct: f64,
    pub max_spread_pct: f64,
    pub max_route_hops: u32,
    pub max_route_deviation: f64,

    // Age and risk
    pub min_age_hours: f64,
    pub young_token_hours: f64,
    pub min_c_young_risky: i32,

    // Momentum bounds
    pub min_m1h_pct: f64,
    pub max_m1h_pct: f64,
    pub min_m24h_pct: f64,
    pub max_m24h_pct: f64,

    // FDV/liq advisory bands
    pub min_fdv_liq: f64,
    pub max_fdv_liq: f64,
    pub preferred_min_fdv_liq: f64,
    pub preferred_max_fdv_liq: f64,

    // Rug heuristics
    pub max_top_holder_pct: f64,

    // Hygiene and data quality
    pub hygiene_penalty: i32,
    pub dq_start: f64,
    pub dq_penalty_per_missing: f64,
    pub min_dq_for_actionable: f64,

    // Confidence shaping
    pub max_rug_cap: i32,
    pub risk_on_adj: i32,
    pub risk_off_adj: i32,

    // Net edge
    pub max_upside_cap: f64,
    pub net_edge_k_factor: f64,
    pub lag_penalty: f64,

    // Bands
    pub headsup_min: i32,
    pub headsup_max: i32,
    pub actionable_base_threshold: i32,
    pub high_conviction_min: i32,

    // Regime
    pub risk_on_sol_change_threshold: f64,
    pub risk_on_momentum_threshold: f64,

    // Advisory sizing (plan line only; no execution)
    pub default_deployed_pct: f64,
    pub max_deployed_pct: f64,
    pub max_positions: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_liquidity_actionable: 150_000.0,
            min_liquidity_headsup: 25_000.0,
            min_volume_actionable: 500_000.0,
            min_volume_headsup: 50_000.0,
            max_impact_pct: 1.5,
            max_spread_pct: 2.5,
            max_route_hops: 3,
            max_route_deviation: 0.8,
            min_age_hours: 24.0,
            young_token_hours: 72.0,
            min_c_young_risky: 80,
            min_m1h_pct: 1.0,
            max_m1h_pct: 12.0,
            min_m24h_pct: 2.0,
            max_m24h_pct: 60.0,
            min_fdv_liq: 2.0,
            max_fdv_liq: 150.0,
            preferred_min_fdv_liq: 5.0,
            preferred_max_fdv_liq: 50.0,
            max_top_holder_pct: 25.0,
            hygiene_penalty: 10,
            dq_start: 1.0,
            dq_penalty_per_missing: 0.08,
            min_dq_for_actionable: 0.7,
            max_rug_cap: 55,
            risk_on_adj: -10,
            risk_off_adj: 10,
            max_upside_cap: 15.0,
            net_edge_k_factor: 2.0,
            lag_penalty: 0.3,
            headsup_min: 60,
            headsup_max: 69,
            actionable_base_threshold: 70,
            high_conviction_min: 85,
            risk_on_sol_change_threshold: 0.0,
            risk_on_momentum_threshold: 0.0,
            default_deployed_pct: 30.0,
            max_deployed_pct: 35.0,
            max_positions: 3,
        }
    }
}

/// Alert cooldowns and window caps.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub cooldown_high_conviction_min: i64,
    pub cooldown_actionable_min: i64,
    pub cooldown_headsup_min: i64,
    pub cooldown_watch_min: i64,
    pub rate_limit_window_min: i64,
    pub max_alerts_per_window: usize,
    pub max_high_conviction_per_window: usize,
    pub max_actionable_per_window: usize,
    pub max_headsup_per_window: usize,
    pub max_watch_per_window: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            cooldown_high_conviction_min: 30,
            cooldown_actionable_min: 60,
            cooldown_headsup_min: 120,
            cooldown_watch_min: 240,
            rate_limit_window_min: 60,
            max_alerts_per_window: 10,
            max_high_conviction_per_window: 2,
            max_actionable_per_window: 5,
            max_headsup_per_window: 8,
            max_watch_per_window: 10,
        }
    }
}

impl ThrottleConfig {
    pub fn cooldown_minutes(&self, band: Band) -> i64 {
        match band {
            Band::HighConviction => self.cooldown_high_conviction_min,
            Band::Actionable => self.cooldown_actionable_min,
            Band::HeadsUp => self.cooldown_headsup_min,
            Band::Watch => self.cooldown_watch_min,
        }
    }

    pub fn band_cap(&self, band: Band) -> usize {
        match band {
            Band::HighConviction => self.max_high_conviction_per_window,
            Band::Actionable => self.max_actionable_per_window,
            Band::HeadsUp => self.max_headsup_per_window,
            Band::Watch => self.max_watch_per_window,
        }
    }

    pub fn max_cooldown_minutes(&self) -> i64 {
        self.cooldown_high_conviction_min
            .max(self.cooldown_actionable_min)
            .max(self.cooldown_headsup_min)
            .max(self.cooldown_watch_min)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub market_ttl_min: i64,
    pub metadata_ttl_min: i64,
    pub signal_ttl_min: i64,
    pub token_list_refresh_min: i64,
    /// Sweep caches on every Nth insert.
    pub sweep_every_n: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    pub sol_mint: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        let defaults = Thresholds::default();
        let throttle_defaults = ThrottleConfig::default();

        Ok(Config {
            bus: BusConfig {
                url: get_env_string("BUS_URL", "redis://127.0.0.1:6379")?,
                stream_market: get_env_string("STREAM_MARKET", streams::MARKET_UPDATES)?,
                stream_alerts: get_env_string("STREAM_ALERTS", streams::ALERTS)?,
                stream_requests: get_env_string("STREAM_CMD_REQUESTS", streams::CMD_REQUESTS)?,
                stream_replies: get_env_string("STREAM_CMD_REPLIES", streams::CMD_REPLIES)?,
                group: get_env_string("BUS_GROUP", "analytics_group")?,
            },
            thresholds: Thresholds {
                min_liquidity_actionable: get_env_f64(
                    "MIN_LIQUIDITY_ACTIONABLE",
                    defaults.min_liquidity_actionable,
                )?,
                min_liquidity_headsup: get_env_f64(
                    "MIN_LIQUIDITY_HEADSUP",
                    defaults.min_liquidity_headsup,
                )?,
                min_volume_actionable: get_env_f64(
                    "MIN_VOLUME_ACTIONABLE",
                    defaults.min_volume_actionable,
                )?,
                min_volume_headsup: get_env_f64("MIN_VOLUME_HEADSUP", defaults.min_volume_headsup)?,
                max_impact_pct: get_env_f64("MAX_IMPACT_PCT", defaults.max_impact_pct)?,
                max_spread_pct: get_env_f64("MAX_SPREAD_PCT", defaults.max_spread_pct)?,
                max_route_hops: get_env_u32("MAX_ROUTE_HOPS", defaults.max_route_hops)?,
                max_route_deviation: get_env_f64(
                    "MAX_ROUTE_DEVIATION",
                    defaults.max_route_deviation,
                )?,
                min_age_hours: get_env_f64("MIN_AGE_HOURS", defaults.min_age_hours)?,
                young_token_hours: get_env_f64("YOUNG_TOKEN_HOURS", defaults.young_token_hours)?,
                min_c_young_risky: get_env_i32("MIN_C_YOUNG_RISKY", defaults.min_c_young_risky)?,
                min_m1h_pct: get_env_f64("MIN_M1H_PCT", defaults.min_m1h_pct)?,
                max_m1h_pct: get_env_f64("MAX_M1H_PCT", defaults.max_m1h_pct)?,
                min_m24h_pct: get_env_f64("MIN_M24H_PCT", defaults.min_m24h_pct)?,
                max_m24h_pct: get_env_f64("MAX_M24H_PCT", defaults.max_m24h_pct)?,
                min_fdv_liq: get_env_f64("MIN_FDV_LIQ", defaults.min_fdv_liq)?,
                max_fdv_liq: get_env_f64("MAX_FDV_LIQ", defaults.max_fdv_liq)?,
                preferred_min_fdv_liq: get_env_f64(
                    "PREFERRED_MIN_FDV_LIQ",
                    defaults.preferred_min_fdv_liq,
                )?,
                preferred_max_fdv_liq: get_env_f64(
                    "PREFERRED_MAX_FDV_LIQ",
                    defaults.preferred_max_fdv_liq,
                )?,
                max_top_holder_pct: get_env_f64("MAX_TOP_HOLDER_PCT", defaults.max_top_holder_pct)?,
                hygiene_penalty: get_env_i32("HYGIENE_PENALTY", defaults.hygiene_penalty)?,
                dq_start: get_env_f64("DQ_START", defaults.dq_start)?,
                dq_penalty_per_missing: get_env_f64(
                    "DQ_PENALTY_PER_MISSING",
                    defaults.dq_penalty_per_missing,
                )?,
                min_dq_for_actionable: get_env_f64(
                    "MIN_DQ_FOR_ACTIONABLE",
                    defaults.min_dq_for_actionable,
                )?,
                max_rug_cap: get_env_i32("MAX_RUG_CAP", defaults.max_rug_cap)?,
                risk_on_adj: get_env_i32("RISK_ON_ADJ", defaults.risk_on_adj)?,
                risk_off_adj: get_env_i32("RISK_OFF_ADJ", defaults.risk_off_adj)?,
                max_upside_cap: get_env_f64("MAX_UPSIDE_CAP", defaults.max_upside_cap)?,
                net_edge_k_factor: get_env_f64("NET_EDGE_K_FACTOR", defaults.net_edge_k_factor)?,
                lag_penalty: get_env_f64("LAG_PENALTY", defaults.lag_penalty)?,
                headsup_min: get_env_i32("HEADSUP_MIN", defaults.headsup_min)?,
                headsup_max: get_env_i32("HEADSUP_MAX", defaults.headsup_max)?,
                actionable_base_threshold: get_env_i32(
                    "ACTIONABLE_BASE_THRESHOLD",
                    defaults.actionable_base_threshold,
                )?,
                high_conviction_min: get_env_i32(
                    "HIGH_CONVICTION_MIN",
                    defaults.high_conviction_min,
                )?,
                risk_on_sol_change_threshold: get_env_f64(
                    "RISK_ON_SOL_CHANGE_THRESHOLD",
                    defaults.risk_on_sol_change_threshold,
                )?,
                risk_on_momentum_threshold: get_env_f64(
                    "RISK_ON_MOMENTUM_THRESHOLD",
                    defaults.risk_on_momentum_threshold,
                )?,
                default_deployed_pct: get_env_f64(
                    "DEFAULT_DEPLOYED_PCT",
                    defaults.default_deployed_pct,
                )?,
                max_deployed_pct: get_env_f64("MAX_DEPLOYED_PCT", defaults.max_deployed_pct)?,
                max_positions: get_env_u32("MAX_POSITIONS", defaults.max_positions)?,
            },
            throttle: ThrottleConfig {
                cooldown_high_conviction_min: get_env_i64(
                    "COOLDOWN_HIGH_CONVICTION_MIN",
                    throttle_defaults.cooldown_high_conviction_min,
                )?,
                cooldown_actionable_min: get_env_i64(
                    "COOLDOWN_ACTIONABLE_MIN",
                    throttle_defaults.cooldown_actionable_min,
                )?,
                cooldown_headsup_min: get_env_i64(
                    "COOLDOWN_HEADSUP_MIN",
                    throttle_defaults.cooldown_headsup_min,
                )?,
                cooldown_watch_min: get_env_i64(
                    "COOLDOWN_WATCH_MIN",
                    throttle_defaults.cooldown_watch_min,
                )?,
                rate_limit_window_min: get_env_i64(
                    "RATE_LIMIT_WINDOW_MIN",
                    throttle_defaults.rate_limit_window_min,
                )?,
                max_alerts_per_window: get_env_usize(
                    "MAX_ALERTS_PER_WINDOW",
                    throttle_defaults.max_alerts_per_window,
                )?,
                max_high_conviction_per_window: get_env_usize(
                    "MAX_HIGH_CONVICTION_PER_WINDOW",
                    throttle_defaults.max_high_conviction_per_window,
                )?,
                max_actionable_per_window: get_env_usize(
                    "MAX_ACTIONABLE_PER_WINDOW",
                    throttle_defaults.max_actionable_per_window,
                )?,
                max_headsup_per_window: get_env_usize(
                    "MAX_HEADSUP_PER_WINDOW",
                    throttle_defaults.max_headsup_per_window,
                )?,
                max_watch_per_window: get_env_usize(
                    "MAX_WATCH_PER_WINDOW",
                    throttle_defaults.max_watch_per_window,
                )?,
            },
            cache: CacheConfig {
                market_ttl_min: get_env_i64("MARKET_CACHE_TTL_MIN", 10)?,
                metadata_ttl_min: get_env_i64("METADATA_CACHE_TTL_MIN", 15)?,
                signal_ttl_min: get_env_i64("SIGNAL_CACHE_TTL_MIN", 30)?,
                token_list_refresh_min: get_env_i64("TOKEN_LIST_REFRESH_MIN", 15)?,
                sweep_every_n: get_env_u64("CACHE_SWEEP_EVERY_N", 100)?,
                queue_capacity: get_env_usize("UPDATE_QUEUE_CAPACITY", 1000)?,
            },
            store: StoreConfig {
                sqlite_path: PathBuf::from(get_env_string("SQLITE_PATH", "./data/soulscout.db")?),
            },
            service: ServiceConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
                sol_mint: get_env_string(
                    "SOL_MINT",
                    "So11111111111111111111111111111111111111112",
                )?,
            },
        })
    }

    /// Fatal misconfiguration aborts the process with a nonzero exit.
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if t.headsup_min > t.headsup_max {
            anyhow::bail!("HEADSUP_MIN must be <= HEADSUP_MAX");
        }
        if t.actionable_base_threshold > t.high_conviction_min {
            anyhow::bail!("ACTIONABLE_BASE_THRESHOLD must be <= HIGH_CONVICTION_MIN");
        }
        if !(0.0..=1.0).contains(&t.min_dq_for_actionable) {
            anyhow::bail!("MIN_DQ_FOR_ACTIONABLE must be within [0, 1]");
        }
        if t.dq_penalty_per_missing < 0.0 {
            anyhow::bail!("DQ_PENALTY_PER_MISSING must be >= 0");
        }
        if t.max_route_hops < 1 {
            anyhow::bail!("MAX_ROUTE_HOPS must be >= 1");
        }
        if t.max_spread_pct <= 0.0 || t.max_impact_pct <= 0.0 {
            anyhow::bail!("MAX_SPREAD_PCT and MAX_IMPACT_PCT must be > 0");
        }
        if t.max_positions == 0 {
            anyhow::bail!("MAX_POSITIONS must be > 0");
        }
        if self.cache.queue_capacity == 0 {
            anyhow::bail!("UPDATE_QUEUE_CAPACITY must be > 0");
        }
        if self.service.sol_mint.is_empty() {
            anyhow::bail!("SOL_MINT must be set");
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

fn get_env_i32(key: &str, default: i32) -> Result<i32> {
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

fn get_env_u32(key: &str, default: u32) -> Result<u32> {
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
    fn test_defaults_are_valid() {
        let config = Config::from_env().expect("load config");
        config.validate().expect("defaults must validate");
        assert_eq!(config.thresholds.actionable_base_threshold, 70);
        assert_eq!(config.throttle.cooldown_actionable_min, 60);
    }

    #[test]
    fn test_validation_rejects_inverted_bands() {
        let mut config = Config::from_env().unwrap();
        config.thresholds.headsup_min = 80;
        config.thresholds.headsup_max = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_throttle_band_lookup() {
        let throttle = ThrottleConfig::default();
        assert_eq!(throttle.cooldown_minutes(Band::Actionable), 60);
        assert_eq!(throttle.band_cap(Band::HighConviction), 2);
        assert_eq!(throttle.max_cooldown_minutes(), 240);
    }
}
