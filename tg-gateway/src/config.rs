//! Configuration for the chat gateway.
//!
//! Secrets (bot token, owner id) can be supplied directly or through
//! `*_FILE` filepath indirection for secret mounts.

use anyhow::{Context, Result};
use soul_bus::streams;
use std::env;
use std::fs;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub telegram: TelegramConfig,
    pub limits: LimitConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream_outbound: String,
    pub stream_requests: String,
    pub stream_replies: String,
    pub stream_audit: String,
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub owner_id: i64,
    pub poll_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct LimitConfig {
    pub rate_limit_msgs_per_min: u32,
    pub global_actionable_max_per_hour: usize,
    pub guest_default_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        Ok(Config {
            bus: BusConfig {
                url: get_env_string("BUS_URL", "redis://127.0.0.1:6379")?,
                stream_outbound: get_env_string("STREAM_OUTBOUND_ALERTS", streams::OUTBOUND_ALERTS)?,
                stream_requests: get_env_string("STREAM_CMD_REQUESTS", streams::CMD_REQUESTS)?,
                stream_replies: get_env_string("STREAM_CMD_REPLIES", streams::CMD_REPLIES)?,
                stream_audit: get_env_string("STREAM_AUDIT", streams::AUDIT)?,
                group: get_env_string("BUS_GROUP", "gateway_group")?,
            },
            telegram: TelegramConfig {
                bot_token: get_env_secret("TELEGRAM_BOT_TOKEN")?.unwrap_or_default(),
                owner_id: get_env_secret("OWNER_TELEGRAM_ID")?
                    .and_then(|raw| raw.trim().parse().ok())
                    .unwrap_or(0),
                poll_timeout_sec: get_env_u64("TELEGRAM_POLL_TIMEOUT_SEC", 30)?,
            },
            limits: LimitConfig {
                rate_limit_msgs_per_min: get_env_u32("RATE_LIMIT_MSGS_PER_MIN", 20)?,
                global_actionable_max_per_hour: get_env_usize("GLOBAL_ACTIONABLE_MAX_PER_HOUR", 5)?,
                guest_default_minutes: get_env_i64("GUEST_DEFAULT_MINUTES", 30)?,
            },
            service: ServiceConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN (or TELEGRAM_BOT_TOKEN_FILE) must be set");
        }
        if self.telegram.owner_id == 0 {
            anyhow::bail!("OWNER_TELEGRAM_ID (or OWNER_TELEGRAM_ID_FILE) must be set");
        }
        if self.limits.rate_limit_msgs_per_min == 0 {
            anyhow::bail!("RATE_LIMIT_MSGS_PER_MIN must be > 0");
        }
        if self.limits.guest_default_minutes <= 0 {
            anyhow::bail!("GUEST_DEFAULT_MINUTES must be > 0");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

/// Value from `KEY`, or the trimmed contents of the file named by
/// `KEY_FILE`. Absent both, `None`.
fn get_env_secret(key: &str) -> Result<Option<String>> {
    if let Ok(value) = env::var(key) {
        return Ok(Some(value));
    }
    let file_key = format!("{}_FILE", key);
    if let Ok(path) = env::var(&file_key) {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {} at {}", file_key, path))?;
        return Ok(Some(contents.trim().to_string()));
    }
    Ok(None)
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

fn get_env_i64(key: &str, default: i64) -> Result<i64> {
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
