//! 📻 Stream bus trait and its Redis implementation.
//!
//! Streams are append-only logs read through consumer groups with blocking
//! reads (~1s) and at-least-once delivery: a message is acked only after the
//! handler returns Ok. Payloads that fail to decode are acked anyway so a
//! poison message never wedges the group.

use crate::backoff::{jitter, Backoff};
use crate::error::BusError;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Handler invoked per message with the decoded `data` JSON. Returning Err
/// leaves the message pending for redelivery.
pub type MessageHandler = Arc<dyn Fn(serde_json::Value) -> anyhow::Result<()> + Send + Sync>;

/// Handle to a running consumer task.
pub struct ConsumerHandle {
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) task: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub async fn join(self) {
        self.stop();
        let _ = self.task.await;
    }
}

/// Contract every service speaks. The key-space operations back the
/// notifier's gates and the gateway's guest PINs.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Append one message; fails fast with `Unavailable` during an outage.
    async fn publish(&self, stream: &str, payload: &serde_json::Value) -> Result<(), BusError>;

    /// Start a long-running consumer-group reader.
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        handler: MessageHandler,
    ) -> Result<ConsumerHandle, BusError>;

    async fn ping(&self) -> Result<(), BusError>;

    /// SET key NX with TTL. Returns true when the key was absent and is now
    /// set, false when it already existed.
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError>;

    /// SET key with TTL, unconditionally.
    async fn set_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError>;

    async fn key_exists(&self, key: &str) -> Result<bool, BusError>;

    async fn get_key(&self, key: &str) -> Result<Option<String>, BusError>;

    async fn delete_key(&self, key: &str) -> Result<(), BusError>;

    /// Increment a counter, arming the TTL window on the first increment.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, BusError>;

    /// Remaining TTL of a key, `None` when the key is absent or unbounded.
    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, BusError>;
}

struct PublisherState {
    conn: Option<redis::aio::MultiplexedConnection>,
    backoff: Backoff,
    last_attempt: Option<Instant>,
    retry_after: Duration,
}

/// Per-consumer delivery counters, mirrored into debug logs.
#[derive(Debug, Default)]
struct ConsumerStats {
    delivered: AtomicU64,
    acked: AtomicU64,
    parse_errors: AtomicU64,
    handler_errors: AtomicU64,
}

/// Redis-streams implementation of [`StreamBus`].
///
/// The publisher connection lives behind one mutex; `ensure_connection`
/// re-checks health under that mutex and stamps the attempt time so
/// concurrent publishers do not hammer a dead endpoint. Consumers own
/// private connections and run their own reconnect backoff.
pub struct RedisStreamBus {
    client: redis::Client,
    publisher: Mutex<PublisherState>,
}

impl RedisStreamBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(BusError::unavailable)?;
        Ok(Self {
            client,
            publisher: Mutex::new(PublisherState {
                conn: None,
                backoff: Backoff::reconnect(),
                last_attempt: None,
                retry_after: Duration::ZERO,
            }),
        })
    }

    async fn ensure_publisher(
        &self,
        state: &mut PublisherState,
    ) -> Result<redis::aio::MultiplexedConnection, BusError> {
        if let Some(conn) = state.conn.as_ref() {
            let mut probe = conn.clone();
            let alive: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut probe).await;
            match alive {
                Ok(_) => return Ok(conn.clone()),
                Err(e) => {
                    warn!("⚠️ Bus publisher connection lost: {}", e);
                    state.conn = None;
                }
            }
        }

        // Fail fast while inside the backoff window; publishers must not
        // block on an outage.
        if let Some(last) = state.last_attempt {
            if last.elapsed() < state.retry_after {
                return Err(BusError::Unavailable(format!(
                    "reconnect backoff active ({}ms remaining)",
                    (state.retry_after - last.elapsed()).as_millis()
                )));
            }
        }

        state.last_attempt = Some(Instant::now());
        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                state.backoff.reset();
                state.retry_after = Duration::ZERO;
                state.conn = Some(conn.clone());
                info!("✅ Bus publisher connection established");
                Ok(conn)
            }
            Err(e) => {
                state.retry_after = state.backoff.next_delay().unwrap_or(Duration::from_secs(30));
                warn!(
                    "⚠️ Bus reconnect failed (attempt {}): {}",
                    state.backoff.attempts(),
                    e
                );
                Err(BusError::unavailable(e))
            }
        }
    }

    async fn key_conn(&self) -> Result<redis::aio::MultiplexedConnection, BusError> {
        let mut state = self.publisher.lock().await;
        self.ensure_publisher(&mut state).await
    }
}

#[async_trait]
impl StreamBus for RedisStreamBus {
    async fn publish(&self, stream: &str, payload: &serde_json::Value) -> Result<(), BusError> {
        let mut state = self.publisher.lock().await;
        let mut conn = self.ensure_publisher(&mut state).await?;
        drop(state);

        let data = payload.to_string();
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let mut fields: Vec<(&str, String)> = vec![("data", data), ("timestamp", ts)];
        if let Some(corr_id) = payload.get("corr_id").and_then(|v| v.as_str()) {
            fields.push(("corr_id", corr_id.to_string()));
        }

        let _: String = conn
            .xadd(stream, "*", &fields)
            .await
            .map_err(BusError::unavailable)?;
        Ok(())
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        handler: MessageHandler,
    ) -> Result<ConsumerHandle, BusError> {
        let running = Arc::new(AtomicBool::new(true));
        let client = self.client.clone();
        let stream = stream.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let running_task = running.clone();

        let task = tokio::spawn(async move {
            let stats = ConsumerStats::default();
            let mut backoff = Backoff::reconnect();

            info!("🎧 Consumer {} starting on {} ({})", consumer, stream, group);

            'reconnect: while running_task.load(Ordering::Relaxed) {
                let mut conn = match client.get_multiplexed_tokio_connection().await {
                    Ok(c) => c,
                    Err(e) => {
                        let delay = backoff.next_delay().unwrap_or(Duration::from_secs(30));
                        warn!(
                            "⚠️ Consumer {} cannot reach bus: {} (retry in {:?})",
                            consumer, e, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                backoff.reset();

                // Idempotent group creation; BUSYGROUP means it already
                // exists, which is fine.
                let created: redis::RedisResult<String> = conn
                    .xgroup_create_mkstream(&stream, &group, "0")
                    .await;
                if let Err(e) = created {
                    if !e.to_string().contains("BUSYGROUP") {
                        error!("❌ Consumer {} group create failed: {}", consumer, e);
                        tokio::time::sleep(jitter(Duration::from_secs(1))).await;
                        continue;
                    }
                }

                let opts = StreamReadOptions::default()
                    .group(&group, &consumer)
                    .count(16)
                    .block(1000);

                while running_task.load(Ordering::Relaxed) {
                    let reply: redis::RedisResult<StreamReadReply> =
                        conn.xread_options(&[&stream], &[">"], &opts).await;

                    let reply = match reply {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("⚠️ Consumer {} read error: {}", consumer, e);
                            tokio::time::sleep(jitter(Duration::from_secs(1))).await;
                            continue 'reconnect;
                        }
                    };

                    for key in reply.keys {
                        for entry in key.ids {
                            stats.delivered.fetch_add(1, Ordering::Relaxed);

                            let decoded = entry
                                .get::<String>("data")
                                .ok_or_else(|| BusError::Parse("missing data field".into()))
                                .and_then(|raw| {
                                    serde_json::from_str::<serde_json::Value>(&raw)
                                        .map_err(|e| BusError::Parse(e.to_string()))
                                });

                            match decoded {
                                Ok(value) => match handler(value) {
                                    Ok(()) => {
                                        let acked: redis::RedisResult<i64> =
                                            conn.xack(&stream, &group, &[&entry.id]).await;
                                        if let Err(e) = acked {
                                            warn!(
                                                "⚠️ Ack failed for {} on {}: {}",
                                                entry.id, stream, e
                                            );
                                        } else {
                                            stats.acked.fetch_add(1, Ordering::Relaxed);
                                        }
                                    }
                                    Err(e) => {
                                        // Not acked: redelivered on restart.
                                        stats.handler_errors.fetch_add(1, Ordering::Relaxed);
                                        warn!(
                                            "⚠️ Handler error on {} ({}), left pending: {}",
                                            stream, entry.id, e
                                        );
                                    }
                                },
                                Err(e) => {
                                    // Poison message: log, ack, move on.
                                    stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                                    warn!("⚠️ Dropping unparseable message on {}: {}", stream, e);
                                    let _: redis::RedisResult<i64> =
                                        conn.xack(&stream, &group, &[&entry.id]).await;
                                }
                            }
                        }
                    }
                }
            }

            debug!(
                "🛑 Consumer {} stopped: delivered={} acked={} parse_err={} handler_err={}",
                consumer,
                stats.delivered.load(Ordering::Relaxed),
                stats.acked.load(Ordering::Relaxed),
                stats.parse_errors.load(Ordering::Relaxed),
                stats.handler_errors.load(Ordering::Relaxed),
            );
        });

        Ok(ConsumerHandle { running, task })
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.key_conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(BusError::unavailable)?;
        Ok(())
    }

    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, BusError> {
        let mut conn = self.key_conn().await?;
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(BusError::unavailable)?;
        Ok(set.is_some())
    }

    async fn set_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BusError> {
        let mut conn = self.key_conn().await?;
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(BusError::unavailable)?;
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> Result<bool, BusError> {
        let mut conn = self.key_conn().await?;
        let exists: bool = conn.exists(key).await.map_err(BusError::unavailable)?;
        Ok(exists)
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.key_conn().await?;
        let value: Option<String> = conn.get(key).await.map_err(BusError::unavailable)?;
        Ok(value)
    }

    async fn delete_key(&self, key: &str) -> Result<(), BusError> {
        let mut conn = self.key_conn().await?;
        let _: i64 = conn.del(key).await.map_err(BusError::unavailable)?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<i64, BusError> {
        let mut conn = self.key_conn().await?;
        let count: i64 = conn.incr(key, 1).await.map_err(BusError::unavailable)?;
        if count == 1 {
            let _: bool = conn
                .expire(key, window.as_secs().max(1) as i64)
                .await
                .map_err(BusError::unavailable)?;
        }
        Ok(count)
    }

    async fn key_ttl(&self, key: &str) -> Result<Option<Duration>, BusError> {
        let mut conn = self.key_conn().await?;
        let ttl: i64 = conn.ttl(key).await.map_err(BusError::unavailable)?;
        if ttl > 0 {
            Ok(Some(Duration::from_secs(ttl as u64)))
        } else {
            Ok(None)
        }
    }
}
