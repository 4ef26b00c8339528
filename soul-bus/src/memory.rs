//! In-process bus double for tests: same trait, no Redis.

use crate::error::BusError;
use crate::stream_bus::{ConsumerHandle, MessageHandler, StreamBus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct KeyEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KeyEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// Append-only vec per stream, one cursor per (stream, group), TTL'd key
/// map. `set_available(false)` simulates an outage: every operation then
/// fails with `Unavailable`, which is what the fail-closed paths key on.
#[derive(Default)]
pub struct MemoryBus {
    streams: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    cursors: Mutex<HashMap<(String, String), usize>>,
    keys: Mutex<HashMap<String, KeyEntry>>,
    down: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::Relaxed);
    }

    fn check_up(&self) -> Result<(), BusError> {
        if self.down.load(Ordering::Relaxed) {
            Err(BusError::Unavailable("memory bus marked down".into()))
        } else {
            Ok(())
        }
    }

    /// Everything published to a stream so far, for assertions.
    pub fn published(&self, stream: &str) -> Vec<serde_json::Value> {
        self.streams
            .lock()
            .unwrap()
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    pub fn published_count(&self, stream: &str) -> usize {
        self.published(stream).len()
    }

    /// Deliver every unseen message for (stream, group) through the handler,
    /// honoring at-least-once semantics: the cursor only advances past a
    /// message once the handler accepts it.
    pub fn drain(&self, stream: &str, group: &str, handler: &MessageHandler) {
        loop {
            let next = {
                let cursors = self.cursors.lock().unwrap();
                let streams = self.streams.lock().unwrap();
                let pos = cursors
                    .get(&(stream.to_string(), group.to_string()))
                    .copied()
                    .unwrap_or(0);
                streams
                    .get(stream)
                    .and_then(|entries| entries.get(pos).cloned())
            };
            let Some(payload) = next else { break };
            match handler(payload) {
                Ok(()) => {
                    let mut cursors = self.cursors.lock().unwrap();
                    *cursors
                        .entry((stream.to_string(), group.to_string()))
                        .or_insert(0) += 1;
                }
                Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl StreamBus for MemoryBus {
    async fn publish(&self, stream: &str, payload: &serde_json::Value) -> Result<(), BusError> {
        self.check_up()?;
        self.streams
            .lock()
            .unwrap()
            .entry(stream.to_string())
            .or_default()
            .push(payload.clone());
        Ok(())
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        handler: MessageHandler,
    ) -> Result<ConsumerHandle, BusError> {
        // The double has no background reader; tests pump delivery with
        // `drain`. The returned handle parks until stopped so shutdown
        // sequencing can still be exercised.
        self.check_up()?;
        let _ = (stream, group, handler);
        let running = Arc::new(AtomicBool::new(true));
        let running_task = running.clone();
        let task = tokio::spawn(async move {
            while running_task.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        Ok(ConsumerHandle { running, task })
    }

    async fn ping(&self) -> Result<(), BusError> {
        self.check_up()
    }

    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        self.check_up()?;
        let mut keys = self.keys.lock().unwrap();
        if let Some(entry) = keys.get(key) {
            if entry.live() {
                return Ok(false);
            }
        }
        keys.insert(
            key.to_string(),
            KeyEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn set_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        self.check_up()?;
        self.keys.lock().unwrap().insert(
            key.to_string(),
            KeyEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> Result<bool, BusError> {
        self.check_up()?;
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.live())
            .unwrap_or(false))
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>, BusError> {
        self.check_up()?;
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.live())
            .map(|e| e.value.clone()))
    }

    async fn delete_key(&self, key: &str) -> Result<(), BusError> {
        self.check_up()?;
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, BusError> {
        self.check_up()?;
        let mut keys = self.keys.lock().unwrap();
        let fresh = keys.get(key).map(|e| !e.live()).unwrap_or(true);
        if fresh {
            keys.insert(
                key.to_string(),
                KeyEntry {
                    value: "1".to_string(),
                    expires_at: Some(Instant::now() + window),
                },
            );
            return Ok(1);
        }
        let entry = keys.get_mut(key).expect("checked above");
        let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, BusError> {
        self.check_up()?;
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(key)
            .filter(|e| e.live())
            .and_then(|e| e.expires_at)
            .map(|t| t.saturating_duration_since(Instant::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_publish_and_drain() {
        let bus = MemoryBus::new();
        bus.publish("s", &serde_json::json!({"n": 1})).await.unwrap();
        bus.publish("s", &serde_json::json!({"n": 2})).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_h = seen.clone();
        let handler: MessageHandler = Arc::new(move |_v| {
            seen_h.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        bus.drain("s", "g", &handler);
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        // Cursor advanced: draining again delivers nothing new.
        bus.drain("s", "g", &handler);
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_message_pending() {
        let bus = MemoryBus::new();
        bus.publish("s", &serde_json::json!({"n": 1})).await.unwrap();

        let reject: MessageHandler = Arc::new(|_v| anyhow::bail!("not yet"));
        bus.drain("s", "g", &reject);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_h = seen.clone();
        let accept: MessageHandler = Arc::new(move |_v| {
            seen_h.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        bus.drain("s", "g", &accept);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_nx_and_ttl_keys() {
        let bus = MemoryBus::new();
        assert!(bus
            .set_nx_ttl("k", "1", Duration::from_millis(40))
            .await
            .unwrap());
        assert!(!bus
            .set_nx_ttl("k", "1", Duration::from_millis(40))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(bus
            .set_nx_ttl("k", "1", Duration::from_millis(40))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_incr_window_resets_after_expiry() {
        let bus = MemoryBus::new();
        assert_eq!(bus.incr_window("c", Duration::from_millis(40)).await.unwrap(), 1);
        assert_eq!(bus.incr_window("c", Duration::from_millis(40)).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(bus.incr_window("c", Duration::from_millis(40)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_outage_fails_everything() {
        let bus = MemoryBus::new();
        bus.set_available(false);
        assert!(bus.ping().await.is_err());
        assert!(bus.publish("s", &serde_json::json!({})).await.is_err());
        assert!(bus.key_exists("k").await.is_err());
        bus.set_available(true);
        assert!(bus.ping().await.is_ok());
    }
}
