//! Wire messages for every stream on the bus.
//!
//! Each stream entry carries a single `data` field holding one of these
//! types as JSON. Producers own the message; consumers keep only cached
//! copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One OHLCV bar for a labelled interval ("5m", "15m").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_usd: f64,
}

impl OhlcvBar {
    /// Close/open change in percent. `None` when the bar is degenerate.
    pub fn change_pct(&self) -> Option<f64> {
        if self.open > 0.0 {
            Some(((self.close / self.open) - 1.0) * 100.0)
        } else {
            None
        }
    }

    /// (high-low)/low range in percent.
    pub fn range_pct(&self) -> Option<f64> {
        if self.low > 0.0 {
            Some(((self.high - self.low) / self.low) * 100.0)
        } else {
            None
        }
    }
}

/// Route descriptor attached to a market update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub ok: bool,
    pub hops: u32,
    pub deviation_pct: f64,
}

/// Market update published by the ingestor on `soul.market.updates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub pool_id: String,
    pub mint_base: String,
    pub mint_quote: String,
    pub symbol: String,
    pub price: f64,
    pub liq_usd: f64,
    pub vol24h_usd: f64,
    pub spread_pct: f64,
    pub impact_1pct_pct: f64,
    pub age_hours: f64,
    pub route: RouteInfo,
    /// Interval label ("5m", "15m") -> bar.
    #[serde(default)]
    pub bars: HashMap<String, OhlcvBar>,
    pub ts: DateTime<Utc>,
}

impl MarketUpdate {
    pub fn bar(&self, interval: &str) -> Option<&OhlcvBar> {
        self.bars.get(interval)
    }

    /// 1h momentum proxy: close/open percent change of the "5m" bar.
    pub fn m1h_pct(&self) -> Option<f64> {
        self.bar("5m").and_then(|b| b.change_pct())
    }

    /// 24h momentum proxy: close/open percent change of the "15m" bar.
    pub fn m24h_pct(&self) -> Option<f64> {
        self.bar("15m").and_then(|b| b.change_pct())
    }
}

/// Token metadata resolved from the persistent store, cached with a
/// minutes-scale TTL on the analytics side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub on_token_list: bool,
    pub top_holder_pct: f64,
    pub risky_authorities: bool,
    pub first_liquidity_ts: Option<DateTime<Utc>>,
}

/// Advisory severity band, a pure function of (confidence, gates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Watch,
    HeadsUp,
    Actionable,
    HighConviction,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Watch => "watch",
            Band::HeadsUp => "heads_up",
            Band::Actionable => "actionable",
            Band::HighConviction => "high_conviction",
        }
    }

}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert published by analytics on `soul.alerts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertData {
    pub severity: Band,
    pub mint: String,
    pub symbol: String,
    pub price: f64,
    pub confidence: u8,
    /// Ordered human-readable reason lines; the dedup fingerprint hashes
    /// these downstream.
    pub lines: Vec<String>,
    pub plan: String,
    pub sol_path: String,
    pub est_impact_pct: f64,
    pub ts: DateTime<Utc>,
}

/// Formatted alert published by the notifier on `soul.outbound.alerts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundAlert {
    /// Destination chat id.
    pub to: i64,
    pub text: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Who issued a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOrigin {
    pub tg_user_id: i64,
    pub role: String,
}

/// Command request published by the gateway on `soul.cmd.requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub cmd: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub from: CommandOrigin,
    pub corr_id: String,
    pub ts: DateTime<Utc>,
}

impl CommandRequest {
    pub fn new(cmd: &str, args: serde_json::Value, from: CommandOrigin, corr_id: String) -> Self {
        Self {
            kind: "command".to_string(),
            cmd: cmd.to_string(),
            args,
            from,
            corr_id,
            ts: Utc::now(),
        }
    }

    /// String argument by name, if present.
    pub fn arg_str(&self, name: &str) -> Option<String> {
        self.args
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn arg_i64(&self, name: &str) -> Option<i64> {
        self.args.get(name).and_then(|v| v.as_i64())
    }
}

/// Reply published by a service on `soul.cmd.replies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub corr_id: String,
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub ts: DateTime<Utc>,
}

impl CommandReply {
    pub fn ok(corr_id: &str, message: impl Into<String>) -> Self {
        Self {
            corr_id: corr_id.to_string(),
            ok: true,
            message: message.into(),
            data: None,
            ts: Utc::now(),
        }
    }

    pub fn err(corr_id: &str, message: impl Into<String>) -> Self {
        Self {
            corr_id: corr_id.to_string(),
            ok: false,
            message: message.into(),
            data: None,
            ts: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub tg_user_id: i64,
    pub role: String,
}

/// Append-only audit event on `soul.audit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event: String,
    pub actor: AuditActor,
    pub detail: String,
    pub ts: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event: &str, tg_user_id: i64, role: &str, detail: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            actor: AuditActor {
                tg_user_id,
                role: role.to_string(),
            },
            detail: detail.into(),
            ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_update() -> MarketUpdate {
        let mut bars = HashMap::new();
        bars.insert(
            "5m".to_string(),
            OhlcvBar {
                open: 1.0,
                high: 1.06,
                low: 1.0,
                close: 1.05,
                volume_usd: 10_000.0,
            },
        );
        MarketUpdate {
            pool_id: "pool1".to_string(),
            mint_base: "MintA".to_string(),
            mint_quote: "So11111111111111111111111111111111111111112".to_string(),
            symbol: "ABC".to_string(),
            price: 1.05,
            liq_usd: 600_000.0,
            vol24h_usd: 3_000_000.0,
            spread_pct: 0.5,
            impact_1pct_pct: 0.3,
            age_hours: 200.0,
            route: RouteInfo {
                ok: true,
                hops: 2,
                deviation_pct: 0.2,
            },
            bars,
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_momentum_from_bars() {
        let update = sample_update();
        let m1h = update.m1h_pct().unwrap();
        assert!((m1h - 5.0).abs() < 1e-9);
        assert!(update.m24h_pct().is_none());
    }

    #[test]
    fn test_band_wire_format() {
        assert_eq!(
            serde_json::to_string(&Band::HighConviction).unwrap(),
            "\"high_conviction\""
        );
        let band: Band = serde_json::from_str("\"heads_up\"").unwrap();
        assert_eq!(band, Band::HeadsUp);
    }

    #[test]
    fn test_command_request_args() {
        let req = CommandRequest::new(
            "signals",
            serde_json::json!({"window": "60m", "minutes": 30}),
            CommandOrigin {
                tg_user_id: 7,
                role: "owner".to_string(),
            },
            "corr-1".to_string(),
        );
        assert_eq!(req.kind, "command");
        assert_eq!(req.arg_str("window").as_deref(), Some("60m"));
        assert_eq!(req.arg_i64("minutes"), Some(30));
        assert!(req.arg_str("missing").is_none());
    }

    #[test]
    fn test_market_update_roundtrip_keeps_route() {
        let update = sample_update();
        let raw = serde_json::to_string(&update).unwrap();
        let back: MarketUpdate = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.route, update.route);
        assert_eq!(back.bars.len(), 1);
    }
}
