//! Token price collaborator (Jupiter-style price endpoint).

use anyhow::{Context, Result};
use async_trait::async_trait;
use soul_bus::Backoff;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn token_price(&self, mint: &str) -> Result<f64>;

    async fn sol_price(&self) -> Result<f64> {
        self.token_price(SOL_MINT).await
    }
}

pub struct HttpPriceSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPriceSource {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn token_price(&self, mint: &str) -> Result<f64> {
        let mut backoff = Backoff::call();
        loop {
            let attempt = async {
                let url = format!("{}?ids={}", self.endpoint, mint);
                let response: serde_json::Value = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .context("price request failed")?
                    .json()
                    .await
                    .context("price response decode failed")?;
                response["data"][mint]["price"]
                    .as_f64()
                    .context("price missing from response")
            }
            .await;

            match attempt {
                Ok(price) => return Ok(price),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e.context("price lookup exhausted retries")),
                },
            }
        }
    }
}

/// Test double with fixed prices; unknown mints price at zero.
#[derive(Default)]
pub struct MockPriceSource {
    prices: Mutex<HashMap<String, f64>>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, mint: &str, price: f64) -> Self {
        self.prices.lock().unwrap().insert(mint.to_string(), price);
        self
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn token_price(&self, mint: &str) -> Result<f64> {
        Ok(self.prices.lock().unwrap().get(mint).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_sol_price_defaults_to_token_price() {
        let source = MockPriceSource::new().with_price(SOL_MINT, 150.0);
        assert_eq!(source.sol_price().await.unwrap(), 150.0);
        assert_eq!(source.token_price("unknown").await.unwrap(), 0.0);
    }
}
