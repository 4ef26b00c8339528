//! 📱 Telegram REST collaborator.
//!
//! Thin trait over the two calls the gateway needs, with a reqwest
//! implementation (long-poll getUpdates, HTML sendMessage) and a recording
//! mock for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub text: Option<String>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
    async fn get_updates(&self, offset: i64, timeout_sec: u64) -> Result<Vec<TelegramUpdate>>;
}

pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
    last_message_time: RwLock<std::time::Instant>,
    /// Minimum delay between sends; Telegram rejects bursts.
    min_message_delay_ms: u64,
}

impl TelegramClient {
    pub fn new(bot_token: String, poll_timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Long poll plus headroom.
            .timeout(Duration::from_secs(poll_timeout_sec + 10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            bot_token,
            last_message_time: RwLock::new(std::time::Instant::now()),
            min_message_delay_ms: 100,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        {
            let mut last = self.last_message_time.write().await;
            let elapsed = last.elapsed();
            if elapsed.as_millis() < self.min_message_delay_ms as u128 {
                tokio::time::sleep(Duration::from_millis(
                    self.min_message_delay_ms - elapsed.as_millis() as u64,
                ))
                .await;
            }
            *last = std::time::Instant::now();
        }

        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let response = self
            .client
            .post(self.url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .context("sendMessage request failed")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error: {}", body);
        }
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout_sec: u64) -> Result<Vec<TelegramUpdate>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_sec,
            "allowed_updates": ["message"],
        });
        let response = self
            .client
            .post(self.url("getUpdates"))
            .json(&payload)
            .send()
            .await
            .context("getUpdates request failed")?;

        let parsed: ApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .context("getUpdates response decode failed")?;

        if !parsed.ok {
            warn!(
                "⚠️ getUpdates returned not-ok: {}",
                parsed.description.unwrap_or_default()
            );
            return Ok(Vec::new());
        }
        Ok(parsed.result.unwrap_or_default())
    }
}

/// Recording mock: captures sends and serves queued updates.
#[derive(Default)]
pub struct MockTelegram {
    sent: Mutex<Vec<(i64, String)>>,
    updates: Mutex<VecDeque<Vec<TelegramUpdate>>>,
}

impl MockTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_updates(&self, batch: Vec<TelegramUpdate>) {
        self.updates.lock().unwrap().push_back(batch);
    }

    pub fn sent_messages(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_message_to(&self, chat_id: i64) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl TelegramApi for MockTelegram {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn get_updates(&self, _offset: i64, _timeout_sec: u64) -> Result<Vec<TelegramUpdate>> {
        Ok(self.updates.lock().unwrap().pop_front().unwrap_or_default())
    }
}
