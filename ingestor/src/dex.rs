//! DEX pool collaborator.
//!
//! One trait per endpoint; the HTTP implementation retries with backoff
//! and a failed endpoint never sinks the tick (the other sources still
//! contribute).

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use soul_bus::{Backoff, RouteInfo};
use std::sync::Mutex;
use std::time::Duration;

/// One pool row as fetched from a DEX endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_id: String,
    pub dex: String,
    pub mint_base: String,
    pub mint_quote: String,
    pub symbol: String,
    pub price: f64,
    pub reserve_base: f64,
    pub reserve_quote: f64,
    pub tvl_usd: f64,
    pub volume_24h_usd: f64,
    pub spread_pct: f64,
    pub impact_1pct_pct: f64,
    pub age_hours: f64,
    pub route: RouteInfo,
}

#[derive(Debug, Deserialize)]
struct PoolsResponse {
    pools: Vec<PoolInfo>,
}

#[async_trait]
pub trait DexSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_pools(&self) -> Result<Vec<PoolInfo>>;
}

pub struct HttpDexSource {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDexSource {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        // Host part doubles as the display name.
        let name = endpoint
            .split("://")
            .nth(1)
            .unwrap_or(endpoint)
            .split('/')
            .next()
            .unwrap_or(endpoint)
            .to_string();
        Ok(Self {
            name,
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl DexSource for HttpDexSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_pools(&self) -> Result<Vec<PoolInfo>> {
        let mut backoff = Backoff::call();
        loop {
            let attempt = async {
                let response = self
                    .client
                    .get(&self.endpoint)
                    .send()
                    .await
                    .context("pool fetch request failed")?;
                let parsed: PoolsResponse = response
                    .json()
                    .await
                    .context("pool response decode failed")?;
                Ok::<_, anyhow::Error>(parsed.pools)
            }
            .await;

            match attempt {
                Ok(pools) => return Ok(pools),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            "⚠️ {} fetch failed (attempt {}): {} - retrying in {:?}",
                            self.name,
                            backoff.attempts(),
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e.context(format!("{} exhausted retries", self.name))),
                },
            }
        }
    }
}

/// Test double serving queued batches, then empty.
#[derive(Default)]
pub struct MockDexSource {
    batches: Mutex<std::collections::VecDeque<Result<Vec<PoolInfo>, String>>>,
}

impl MockDexSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, pools: Vec<PoolInfo>) {
        self.batches.lock().unwrap().push_back(Ok(pools));
    }

    pub fn queue_error(&self, message: &str) {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl DexSource for MockDexSource {
    fn name(&self) -> &str {
        "mock-dex"
    }

    async fn fetch_pools(&self) -> Result<Vec<PoolInfo>> {
        match self.batches.lock().unwrap().pop_front() {
            Some(Ok(pools)) => Ok(pools),
            Some(Err(message)) => anyhow::bail!("{}", message),
            None => Ok(Vec::new()),
        }
    }
}
