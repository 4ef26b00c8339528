//! Notifier policy gates: mute, global throttle, dedup.
//!
//! Gates run in order against bus key-space state. When the bus cannot be
//! reached the policy fails closed (treat as muted/throttled/duplicate);
//! silence beats noise.

use crate::config::PolicyConfig;
use crate::formatter;
use chrono::Utc;
use log::{info, warn};
use soul_bus::{AlertData, Band, OutboundAlert, StreamBus};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one inbound alert, recorded verbatim in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Muted,
    Throttled,
    Duplicate,
    PublishFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Sent => "SENT",
            Outcome::Muted => "MUTED",
            Outcome::Throttled => "THROTTLED",
            Outcome::Duplicate => "DUPLICATE",
            Outcome::PublishFailed => "PUBLISH_FAILED",
        }
    }
}

pub struct NotifierPolicy {
    cfg: PolicyConfig,
    bus: Arc<dyn StreamBus>,
}

impl NotifierPolicy {
    pub fn new(cfg: PolicyConfig, bus: Arc<dyn StreamBus>) -> Self {
        Self { cfg, bus }
    }

    /// Stable fingerprint of the reason lines for the dedup key.
    pub fn reason_hash(lines: &[String]) -> String {
        let mut hasher = DefaultHasher::new();
        for line in lines {
            line.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    pub async fn is_muted(&self) -> bool {
        match self.bus.key_exists(&self.cfg.mute_key).await {
            Ok(muted) => muted,
            Err(e) => {
                warn!("⚠️ Mute check failed, failing closed: {}", e);
                true
            }
        }
    }

    pub async fn set_mute(&self, minutes: i64) {
        let minutes = if minutes > 0 {
            minutes
        } else {
            self.cfg.default_mute_min
        };
        if let Err(e) = self
            .bus
            .set_ttl(
                &self.cfg.mute_key,
                "1",
                Duration::from_secs(minutes as u64 * 60),
            )
            .await
        {
            warn!("⚠️ Failed to set mute: {}", e);
        }
    }

    pub async fn clear_mute(&self) {
        if let Err(e) = self.bus.delete_key(&self.cfg.mute_key).await {
            warn!("⚠️ Failed to clear mute: {}", e);
        }
    }

    fn throttle_key(&self, severity: Band) -> String {
        format!("{}:{}", self.cfg.global_throttle_prefix, severity)
    }

    /// Only `actionable` alerts are globally throttled; the counter lives
    /// in a TTL window on the bus.
    pub async fn is_globally_throttled(&self, severity: Band) -> bool {
        if severity != Band::Actionable {
            return false;
        }
        match self.bus.get_key(&self.throttle_key(severity)).await {
            Ok(Some(raw)) => raw
                .parse::<i64>()
                .map(|count| count >= self.cfg.global_throttle_limit)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!("⚠️ Throttle check failed, failing closed: {}", e);
                true
            }
        }
    }

    pub async fn record_sent(&self, severity: Band) {
        if severity != Band::Actionable {
            return;
        }
        if let Err(e) = self
            .bus
            .incr_window(
                &self.throttle_key(severity),
                Duration::from_secs(self.cfg.global_throttle_window_sec),
            )
            .await
        {
            warn!("⚠️ Failed to bump throttle counter: {}", e);
        }
    }

    /// SETNX of (mint, reason-hash); an existing key means suppress.
    pub async fn is_duplicate(&self, alert: &AlertData) -> bool {
        let key = format!(
            "{}:{}:{}",
            self.cfg.dedupe_prefix,
            alert.mint,
            Self::reason_hash(&alert.lines)
        );
        match self
            .bus
            .set_nx_ttl(&key, "1", Duration::from_secs(self.cfg.dedupe_ttl_sec))
            .await
        {
            Ok(was_set) => !was_set,
            Err(e) => {
                warn!("⚠️ Dedup check failed, failing closed: {}", e);
                true
            }
        }
    }

    /// Run the gates in order and, when all pass, publish the formatted
    /// outbound alert. Returns the outcome plus detail for the audit row.
    pub async fn evaluate(
        &self,
        alert: &AlertData,
        outbound_stream: &str,
        owner_chat_id: i64,
    ) -> (Outcome, String) {
        if self.is_muted().await {
            return (Outcome::Muted, "Global mute is active.".to_string());
        }
        if self.is_globally_throttled(alert.severity).await {
            return (
                Outcome::Throttled,
                "Global throttle for 'actionable' alerts is active.".to_string(),
            );
        }
        if self.is_duplicate(alert).await {
            return (
                Outcome::Duplicate,
                format!("Duplicate alert within {}s.", self.cfg.dedupe_ttl_sec),
            );
        }

        let outbound = OutboundAlert {
            to: owner_chat_id,
            text: formatter::format_alert(alert),
            ts: Utc::now(),
            meta: serde_json::json!({
                "mint": alert.mint,
                "severity": alert.severity,
                "confidence": alert.confidence,
            }),
        };
        let payload = match serde_json::to_value(&outbound) {
            Ok(p) => p,
            Err(e) => {
                return (
                    Outcome::PublishFailed,
                    format!("Outbound serialization failed: {}", e),
                )
            }
        };

        match self.bus.publish(outbound_stream, &payload).await {
            Ok(()) => {
                self.record_sent(alert.severity).await;
                info!(
                    "📤 Forwarded '{}' alert for {} to gateway",
                    alert.severity, alert.symbol
                );
                (Outcome::Sent, "Alert sent to gateway.".to_string())
            }
            Err(e) => (
                Outcome::PublishFailed,
                format!("Failed to publish outbound alert: {}", e),
            ),
        }
    }
}
