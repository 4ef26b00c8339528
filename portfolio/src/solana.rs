//! Solana JSON-RPC collaborator: balance and token-account reads only.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use soul_bus::Backoff;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone)]
pub struct TokenAccount {
    pub mint: String,
    pub amount: f64,
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn get_sol_balance(&self, address: &str) -> Result<f64>;
    async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>>;
}

pub struct HttpSolanaRpc {
    client: reqwest::Client,
    url: String,
}

impl HttpSolanaRpc {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn rpc_call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let mut backoff = Backoff::call();
        loop {
            let attempt = async {
                let body = json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": method,
                    "params": params,
                });
                let response: serde_json::Value = self
                    .client
                    .post(&self.url)
                    .json(&body)
                    .send()
                    .await
                    .context("RPC request failed")?
                    .json()
                    .await
                    .context("RPC response decode failed")?;
                if let Some(err) = response.get("error") {
                    anyhow::bail!("RPC error: {}", err);
                }
                Ok::<_, anyhow::Error>(response["result"].clone())
            }
            .await;

            match attempt {
                Ok(result) => return Ok(result),
                Err(e) => match backoff.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(e.context(format!("{} exhausted retries", method))),
                },
            }
        }
    }
}

#[async_trait]
impl SolanaRpc for HttpSolanaRpc {
    async fn get_sol_balance(&self, address: &str) -> Result<f64> {
        let result = self.rpc_call("getBalance", json!([address])).await?;
        let lamports = result["value"].as_u64().unwrap_or(0);
        Ok(lamports as f64 / LAMPORTS_PER_SOL)
    }

    async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>> {
        let params = json!([
            address,
            {"programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"},
            {"encoding": "jsonParsed"}
        ]);
        let result = self.rpc_call("getTokenAccountsByOwner", params).await?;

        let mut accounts = Vec::new();
        if let Some(entries) = result["value"].as_array() {
            for entry in entries {
                let info = &entry["account"]["data"]["parsed"]["info"];
                let mint = info["mint"].as_str().unwrap_or_default().to_string();
                let amount = info["tokenAmount"]["uiAmount"].as_f64().unwrap_or(0.0);
                if !mint.is_empty() && amount > 0.0 {
                    accounts.push(TokenAccount { mint, amount });
                }
            }
        }
        Ok(accounts)
    }
}

/// Test double with configurable balances.
#[derive(Default)]
pub struct MockSolanaRpc {
    balances: Mutex<HashMap<String, f64>>,
    accounts: Mutex<HashMap<String, Vec<TokenAccount>>>,
}

impl MockSolanaRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: &str, sol: f64) -> Self {
        self.balances.lock().unwrap().insert(address.to_string(), sol);
        self
    }

    pub fn with_accounts(self, address: &str, accounts: Vec<TokenAccount>) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(address.to_string(), accounts);
        self
    }
}

#[async_trait]
impl SolanaRpc for MockSolanaRpc {
    async fn get_sol_balance(&self, address: &str) -> Result<f64> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0.0))
    }

    async fn get_token_accounts(&self, address: &str) -> Result<Vec<TokenAccount>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_balances() {
        let rpc = MockSolanaRpc::new().with_balance("addr", 1.5);
        assert_eq!(rpc.get_sol_balance("addr").await.unwrap(), 1.5);
        assert_eq!(rpc.get_sol_balance("other").await.unwrap(), 0.0);
    }
}
