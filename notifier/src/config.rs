//! Configuration for the notifier service.

use anyhow::{Context, Result};
use soul_bus::streams;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub policy: PolicyConfig,
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream_alerts: String,
    pub stream_outbound: String,
    pub stream_requests: String,
    pub stream_replies: String,
    pub group: String,
}

/// Gate configuration. Keys live in the bus key-space so a restart keeps
/// mute and dedup state.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub mute_key: String,
    pub global_throttle_prefix: String,
    pub dedupe_prefix: String,
    /// Dedup fingerprint TTL (default 6h).
    pub dedupe_ttl_sec: u64,
    /// Max `actionable` alerts per window before the global gate closes.
    pub global_throttle_limit: i64,
    pub global_throttle_window_sec: u64,
    pub default_mute_min: i64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
    /// Chat every outbound alert is addressed to.
    pub owner_chat_id: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            bus: BusConfig {
                url: get_env_string("BUS_URL", "redis://127.0.0.1:6379")?,
                stream_alerts: get_env_string("STREAM_ALERTS", streams::ALERTS)?,
                stream_outbound: get_env_string("STREAM_OUTBOUND_ALERTS", streams::OUTBOUND_ALERTS)?,
                stream_requests: get_env_string("STREAM_CMD_REQUESTS", streams::CMD_REQUESTS)?,
                stream_replies: get_env_string("STREAM_CMD_REPLIES", streams::CMD_REPLIES)?,
                group: get_env_string("BUS_GROUP", "notifier_group")?,
            },
            policy: PolicyConfig {
                mute_key: get_env_string("MUTE_KEY", "notifier:mute_status")?,
                global_throttle_prefix: get_env_string(
                    "GLOBAL_THROTTLE_PREFIX",
                    "notifier:global_throttle",
                )?,
                dedupe_prefix: get_env_string("DEDUPE_PREFIX", "notifier:dedupe")?,
                dedupe_ttl_sec: get_env_u64("DEDUPE_TTL_SEC", 6 * 3600)?,
                global_throttle_limit: get_env_i64("GLOBAL_ACTIONABLE_MAX_PER_HOUR", 5)?,
                global_throttle_window_sec: get_env_u64("GLOBAL_THROTTLE_WINDOW_SEC", 3600)?,
                default_mute_min: get_env_i64("DEFAULT_MUTE_MIN", 60)?,
            },
            store: StoreConfig {
                sqlite_path: PathBuf::from(get_env_string("SQLITE_PATH", "./data/soulscout.db")?),
            },
            service: ServiceConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
                owner_chat_id: get_env_i64("OWNER_CHAT_ID", 0)?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.policy.dedupe_ttl_sec == 0 {
            anyhow::bail!("DEDUPE_TTL_SEC must be > 0");
        }
        if self.policy.global_throttle_limit <= 0 {
            anyhow::bail!("GLOBAL_ACTIONABLE_MAX_PER_HOUR must be > 0");
        }
        if self.policy.default_mute_min <= 0 {
            anyhow::bail!("DEFAULT_MUTE_MIN must be > 0");
        }
        if self.service.owner_chat_id == 0 {
            log::warn!("OWNER_CHAT_ID is not set - outbound alerts will have no destination");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.dedupe_ttl_sec, 21_600);
        assert_eq!(config.policy.global_throttle_limit, 5);
    }
}
