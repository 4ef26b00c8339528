//! Configuration for the portfolio service.

use anyhow::Result;
use soul_bus::streams;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub rpc: RpcConfig,
    pub store: StoreConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub stream_requests: String,
    pub stream_replies: String,
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub solana_url: String,
    pub price_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
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
                stream_requests: get_env_string("STREAM_CMD_REQUESTS", streams::CMD_REQUESTS)?,
                stream_replies: get_env_string("STREAM_CMD_REPLIES", streams::CMD_REPLIES)?,
                group: get_env_string("BUS_GROUP", "portfolio_group")?,
            },
            rpc: RpcConfig {
                solana_url: get_env_string("SOLANA_RPC_URL", "https://api.mainnet-beta.solana.com")?,
                price_endpoint: get_env_string("PRICE_ENDPOINT", "https://price.jup.ag/v6/price")?,
            },
            store: StoreConfig {
                sqlite_path: PathBuf::from(get_env_string("SQLITE_PATH", "./data/soulscout.db")?),
            },
            service: ServiceConfig {
                log_level: get_env_string("LOG_LEVEL", "info")?,
            },
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc.solana_url.is_empty() {
            anyhow::bail!("SOLANA_RPC_URL must be set");
        }
        if self.rpc.price_endpoint.is_empty() {
            anyhow::bail!("PRICE_ENDPOINT must be set");
        }
        Ok(())
    }
}

fn get_env_string(key: &str, default: &str) -> Result<String> {
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_ok());
    }
}
