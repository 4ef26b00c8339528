//! 📊 Signal derivation
//!
//! Pure mapping from one market update (plus optional token metadata and
//! the token-list membership set) to eleven normalized sub-signals, a
//! data-quality factor and ordered reason lines. No I/O, no failure paths:
//! missing inputs degrade to neutral values.

use crate::config::Thresholds;
use soul_bus::{MarketUpdate, TokenMetadata};
use std::collections::HashSet;

/// Full per-update signal state. `confidence`, `band` and the gate booleans
/// are filled in by the scorer and entry gate after derivation.
#[derive(Debug, Clone)]
pub struct SignalResult {
    pub s1_liquidity: f64,
    pub s2_volume: f64,
    pub s3_momentum_1h: f64,
    pub s4_momentum_24h: f64,
    pub s5_volatility: f64,
    pub s6_price_discovery: f64,
    pub s7_rug_risk: f64,
    pub s8_tradability: f64,
    pub s9_relative_strength: f64,
    pub s10_route_quality: f64,
    pub n1_hygiene: f64,

    pub data_quality: f64,
    pub confidence: u8,
    pub band: soul_bus::Band,
    pub entry_confirmed: bool,
    pub net_edge_ok: bool,
    pub reasons: Vec<String>,
}

impl SignalResult {
    pub fn signal_values(&self) -> [f64; 11] {
        [
            self.s1_liquidity,
            self.s2_volume,
            self.s3_momentum_1h,
            self.s4_momentum_24h,
            self.s5_volatility,
            self.s6_price_discovery,
            self.s7_rug_risk,
            self.s8_tradability,
            self.s9_relative_strength,
            self.s10_route_quality,
            self.n1_hygiene,
        ]
    }
}

pub struct SignalCalculator {
    cfg: Thresholds,
}

impl SignalCalculator {
    pub fn new(cfg: Thresholds) -> Self {
        Self { cfg }
    }

    pub fn calculate(
        &self,
        update: &MarketUpdate,
        metadata: Option<&TokenMetadata>,
        token_list: &HashSet<String>,
    ) -> SignalResult {
        let mut result = SignalResult {
            s1_liquidity: self.s1_liquidity(update),
            s2_volume: self.s2_volume(update),
            s3_momentum_1h: self.s3_momentum_1h(update),
            s4_momentum_24h: self.s4_momentum_24h(update),
            s5_volatility: self.s5_volatility(update),
            s6_price_discovery: 0.0,
            s7_rug_risk: self.s7_rug_risk(update, metadata),
            s8_tradability: self.s8_tradability(update),
            s9_relative_strength: self.s9_relative_strength(),
            s10_route_quality: self.s10_route_quality(update),
            n1_hygiene: self.n1_hygiene(&update.mint_base, token_list),
            data_quality: self.data_quality(update),
            confidence: 0,
            band: soul_bus::Band::Watch,
            entry_confirmed: false,
            net_edge_ok: false,
            reasons: Vec::new(),
        };
        result.s6_price_discovery = 0.4 * result.s2_volume + 0.6 * result.s5_volatility.min(0.8);
        result.reasons = self.reasons(update, metadata, &result);
        result
    }

    /// S1: liquidity depth. 0.5 at the actionable floor, 0.8 at $500k,
    /// 0.9 at $1M, saturating at $2M.
    fn s1_liquidity(&self, update: &MarketUpdate) -> f64 {
        let liq = update.liq_usd;
        let c = &self.cfg;
        if liq <= 0.0 || liq < c.min_liquidity_headsup {
            0.0
        } else if liq < c.min_liquidity_actionable {
            0.3 + 0.2 * (liq - c.min_liquidity_headsup)
                / (c.min_liquidity_actionable - c.min_liquidity_headsup)
        } else if liq < 500_000.0 {
            0.5 + 0.3 * (liq - c.min_liquidity_actionable) / (500_000.0 - c.min_liquidity_actionable)
        } else if liq < 1_000_000.0 {
            0.8 + 0.1 * (liq - 500_000.0) / 500_000.0
        } else if liq < 2_000_000.0 {
            0.9 + 0.1 * (liq - 1_000_000.0) / 1_000_000.0
        } else {
            1.0
        }
    }

    /// S2: 24h volume. 0.5 at the actionable floor, 0.8 at $2M, 0.9 at $5M,
    /// saturating at $10M.
    fn s2_volume(&self, update: &MarketUpdate) -> f64 {
        let vol = update.vol24h_usd;
        let c = &self.cfg;
        if vol <= 0.0 || vol < c.min_volume_headsup {
            0.0
        } else if vol < c.min_volume_actionable {
            0.3 + 0.2 * (vol - c.min_volume_headsup)
                / (c.min_volume_actionable - c.min_volume_headsup)
        } else if vol < 2_000_000.0 {
            0.5 + 0.3 * (vol - c.min_volume_actionable) / (2_000_000.0 - c.min_volume_actionable)
        } else if vol < 5_000_000.0 {
            0.8 + 0.1 * (vol - 2_000_000.0) / 3_000_000.0
        } else if vol < 10_000_000.0 {
            0.9 + 0.1 * (vol - 5_000_000.0) / 5_000_000.0
        } else {
            1.0
        }
    }

    /// S3: short momentum from the "5m" bar close/open. Neutral 0.5 at 0%,
    /// punished below -5%, saturating at the configured upper bound.
    fn s3_momentum_1h(&self, update: &MarketUpdate) -> f64 {
        let Some(m1h) = update.m1h_pct() else {
            return 0.5;
        };
        let c = &self.cfg;
        if m1h <= -10.0 {
            0.0
        } else if m1h <= -5.0 {
            0.3 * (m1h + 10.0) / 5.0
        } else if m1h <= 0.0 {
            0.3 + 0.2 * (m1h + 5.0) / 5.0
        } else if m1h < c.min_m1h_pct {
            0.5 + 0.2 * m1h / c.min_m1h_pct
        } else if m1h <= 6.0 {
            0.7 + 0.2 * (m1h - c.min_m1h_pct) / (6.0 - c.min_m1h_pct)
        } else if m1h <= c.max_m1h_pct {
            0.9 + 0.1 * (m1h - 6.0) / (c.max_m1h_pct - 6.0)
        } else {
            1.0
        }
    }

    /// S4: longer momentum from the "15m" bar close/open, with wider
    /// anchors (-30 / -10 / 0 / min / +20 / max).
    fn s4_momentum_24h(&self, update: &MarketUpdate) -> f64 {
        let m24h = update.m24h_pct().unwrap_or(0.0);
        let c = &self.cfg;
        if m24h <= -30.0 {
            0.0
        } else if m24h <= -10.0 {
            0.3 * (m24h + 30.0) / 20.0
        } else if m24h <= 0.0 {
            0.3 + 0.2 * (m24h + 10.0) / 10.0
        } else if m24h < c.min_m24h_pct {
            0.5 + 0.2 * m24h / c.min_m24h_pct
        } else if m24h <= 20.0 {
            0.7 + 0.2 * (m24h - c.min_m24h_pct) / (20.0 - c.min_m24h_pct)
        } else if m24h <= c.max_m24h_pct {
            0.9 + 0.1 * (m24h - 20.0) / (c.max_m24h_pct - 20.0)
        } else {
            1.0
        }
    }

    /// S5: (high-low)/low range of the "15m" bar: 0.5 at 5%, 0.8 at 10%,
    /// saturating at 20%.
    fn s5_volatility(&self, update: &MarketUpdate) -> f64 {
        let Some(range) = update.bar("15m").and_then(|b| b.range_pct()) else {
            return 0.5;
        };
        if range <= 0.0 {
            0.0
        } else if range <= 5.0 {
            0.5 * range / 5.0
        } else if range <= 10.0 {
            0.5 + 0.3 * (range - 5.0) / 5.0
        } else if range <= 20.0 {
            0.8 + 0.2 * (range - 10.0) / 10.0
        } else {
            1.0
        }
    }

    /// S7: rug risk, higher is safer. Base 0.7 scaled by age, holder
    /// concentration and authority flags; neutral 0.5 without metadata.
    /// Capped at 0.9: there is always residual risk.
    fn s7_rug_risk(&self, update: &MarketUpdate, metadata: Option<&TokenMetadata>) -> f64 {
        let score = match metadata {
            Some(meta) => {
                let age_factor = (update.age_hours / 720.0).min(1.0);
                let holder_factor = if meta.top_holder_pct > 0.0 {
                    (1.0 - meta.top_holder_pct / 100.0).max(0.0)
                } else {
                    1.0
                };
                let auth_factor = if meta.risky_authorities { 0.7 } else { 1.0 };
                0.7 * age_factor * holder_factor * auth_factor
            }
            None => 0.5,
        };
        score.min(0.9)
    }

    /// S8: zero once spread or impact breach their gates; otherwise a
    /// 0.4/0.6 blend of the normalized headroom.
    fn s8_tradability(&self, update: &MarketUpdate) -> f64 {
        let c = &self.cfg;
        if update.spread_pct > c.max_spread_pct || update.impact_1pct_pct > c.max_impact_pct {
            return 0.0;
        }
        let spread_score = 1.0 - update.spread_pct / c.max_spread_pct;
        let impact_score = 1.0 - update.impact_1pct_pct / c.max_impact_pct;
        0.4 * spread_score + 0.6 * impact_score
    }

    /// S9: relative strength vs the reference asset. Held at 0.7 until a
    /// true cross-asset ratio is wired in.
    fn s9_relative_strength(&self) -> f64 {
        0.7
    }

    /// S10: zero for invalid routes; otherwise 0.3/0.7 blend of the
    /// hop-normalized and deviation-normalized scores.
    fn s10_route_quality(&self, update: &MarketUpdate) -> f64 {
        let c = &self.cfg;
        let route = &update.route;
        if !route.ok || route.hops > c.max_route_hops || route.deviation_pct > c.max_route_deviation
        {
            return 0.0;
        }
        let hops_score = if c.max_route_hops > 1 {
            1.0 - (route.hops.saturating_sub(1)) as f64 / (c.max_route_hops - 1) as f64
        } else {
            1.0
        };
        let deviation_score = 1.0 - route.deviation_pct / c.max_route_deviation;
        0.3 * hops_score + 0.7 * deviation_score
    }

    /// N1: membership in a widely mirrored token list.
    fn n1_hygiene(&self, mint: &str, token_list: &HashSet<String>) -> f64 {
        if token_list.contains(mint) {
            1.0
        } else {
            0.0
        }
    }

    /// Data quality: starts at dq_start, one penalty per missing or
    /// reconstructed input, floored at zero.
    fn data_quality(&self, update: &MarketUpdate) -> f64 {
        let mut dq = self.cfg.dq_start;
        let penalty = self.cfg.dq_penalty_per_missing;
        if update.liq_usd <= 0.0 {
            dq -= penalty;
        }
        if update.vol24h_usd <= 0.0 {
            dq -= penalty;
        }
        if update.bar("5m").is_none() {
            dq -= penalty;
        }
        if update.bar("15m").is_none() {
            dq -= penalty;
        }
        if update.spread_pct <= 0.0 {
            dq -= penalty;
        }
        if update.impact_1pct_pct <= 0.0 {
            dq -= penalty;
        }
        dq.max(0.0)
    }

    /// Ordered human-readable reason lines. These feed alert text and the
    /// notifier's dedup fingerprint.
    fn reasons(
        &self,
        update: &MarketUpdate,
        metadata: Option<&TokenMetadata>,
        result: &SignalResult,
    ) -> Vec<String> {
        let c = &self.cfg;
        let mut reasons = Vec::new();

        if update.liq_usd >= c.min_liquidity_actionable {
            reasons.push(format!("Liq ${:.1}k", update.liq_usd / 1_000.0));
        } else if update.liq_usd >= c.min_liquidity_headsup {
            reasons.push(format!("Liq ${:.1}k (low)", update.liq_usd / 1_000.0));
        }

        if update.vol24h_usd >= c.min_volume_actionable {
            reasons.push(format!("Vol24h ${:.1}M", update.vol24h_usd / 1_000_000.0));
        } else if update.vol24h_usd >= c.min_volume_headsup {
            reasons.push(format!("Vol24h ${:.1}k (low)", update.vol24h_usd / 1_000.0));
        }

        if let Some(m1h) = update.m1h_pct() {
            if m1h >= c.min_m1h_pct {
                reasons.push(format!("m1h +{:.1}%", m1h));
            } else if m1h <= -5.0 {
                reasons.push(format!("m1h {:.1}%", m1h));
            }
        }

        if let Some(m24h) = update.m24h_pct() {
            if m24h >= c.min_m24h_pct {
                reasons.push(format!("m24h +{:.1}%", m24h));
            } else if m24h <= -10.0 {
                reasons.push(format!("m24h {:.1}%", m24h));
            }
        }

        if update.age_hours < c.young_token_hours {
            reasons.push(format!("age {:.1}h (young)", update.age_hours));
        } else {
            reasons.push(format!("age {}d", (update.age_hours / 24.0) as i64));
        }

        if result.s8_tradability >= 0.8 {
            reasons.push(format!(
                "spread {:.2}%, impact {:.2}%",
                update.spread_pct, update.impact_1pct_pct
            ));
        } else if update.spread_pct > c.max_spread_pct || update.impact_1pct_pct > c.max_impact_pct
        {
            reasons.push(format!(
                "poor liquidity: spread {:.2}%, impact {:.2}%",
                update.spread_pct, update.impact_1pct_pct
            ));
        }

        if update.route.ok
            && update.route.hops <= c.max_route_hops
            && update.route.deviation_pct <= c.max_route_deviation
        {
            reasons.push(format!(
                "route {} hops, dev {:.2}%",
                update.route.hops, update.route.deviation_pct
            ));
        } else {
            reasons.push("route issues".to_string());
        }

        if let Some(meta) = metadata {
            if update.liq_usd > 0.0 {
                // Market cap is not on the update; a fixed placeholder ratio
                // keeps the reason slot best-effort.
                let fdv_liq_ratio = 10.0;
                if fdv_liq_ratio > c.max_fdv_liq {
                    reasons.push(format!("FDV/Liq {:.1} (high)", fdv_liq_ratio));
                } else if fdv_liq_ratio < c.min_fdv_liq {
                    reasons.push(format!("FDV/Liq {:.1} (low)", fdv_liq_ratio));
                } else if fdv_liq_ratio >= c.preferred_min_fdv_liq
                    && fdv_liq_ratio <= c.preferred_max_fdv_liq
                {
                    reasons.push(format!("FDV/Liq {:.1} (good)", fdv_liq_ratio));
                }
            }

            if meta.top_holder_pct > c.max_top_holder_pct {
                reasons.push(format!("top holder {:.1}% (high)", meta.top_holder_pct));
            }
            if meta.risky_authorities {
                reasons.push("risky authorities".to_string());
            }
            if !meta.on_token_list {
                reasons.push("not on token list".to_string());
            }
        }

        if result.data_quality < c.min_dq_for_actionable {
            reasons.push(format!("DQ {:.2} (low)", result.data_quality));
        }

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use soul_bus::{OhlcvBar, RouteInfo};
    use std::collections::HashMap;

    fn thresholds() -> Thresholds {
        Thresholds::default()
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> OhlcvBar {
        OhlcvBar {
            open,
            high,
            low,
            close,
            volume_usd: 100_000.0,
        }
    }

    fn update() -> MarketUpdate {
        let mut bars = HashMap::new();
        bars.insert("5m".to_string(), bar(1.0, 1.06, 1.0, 1.05));
        bars.insert("15m".to_string(), bar(1.0, 1.25, 0.98, 1.20));
        MarketUpdate {
            pool_id: "pool-a".to_string(),
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
    fn test_all_signals_stay_normalized() {
        let calc = SignalCalculator::new(thresholds());
        let result = calc.calculate(&update(), None, &HashSet::new());
        for (i, v) in result.signal_values().iter().enumerate() {
            assert!((0.0..=1.0).contains(v), "signal {} out of range: {}", i, v);
        }
        assert!((0.0..=1.0).contains(&result.data_quality));
    }

    #[test]
    fn test_s1_anchor_points() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();

        u.liq_usd = 10_000.0; // below heads-up floor
        assert_eq!(calc.calculate(&u, None, &HashSet::new()).s1_liquidity, 0.0);

        u.liq_usd = 150_000.0;
        assert!((calc.calculate(&u, None, &HashSet::new()).s1_liquidity - 0.5).abs() < 1e-9);

        u.liq_usd = 500_000.0;
        assert!((calc.calculate(&u, None, &HashSet::new()).s1_liquidity - 0.8).abs() < 1e-9);

        u.liq_usd = 1_000_000.0;
        assert!((calc.calculate(&u, None, &HashSet::new()).s1_liquidity - 0.9).abs() < 1e-9);

        u.liq_usd = 3_000_000.0;
        assert_eq!(calc.calculate(&u, None, &HashSet::new()).s1_liquidity, 1.0);
    }

    #[test]
    fn test_s3_neutral_without_5m_bar() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.bars.remove("5m");
        let result = calc.calculate(&u, None, &HashSet::new());
        assert_eq!(result.s3_momentum_1h, 0.5);
    }

    #[test]
    fn test_s3_monotonic_over_momentum() {
        let calc = SignalCalculator::new(thresholds());
        let mut last = -1.0;
        for close in [0.88, 0.93, 0.97, 1.0, 1.005, 1.03, 1.08, 1.15] {
            let mut u = update();
            u.bars.insert("5m".to_string(), bar(1.0, 1.2, 0.85, close));
            let s3 = calc.calculate(&u, None, &HashSet::new()).s3_momentum_1h;
            assert!(s3 >= last, "s3 not monotonic at close {}", close);
            last = s3;
        }
    }

    #[test]
    fn test_s7_without_metadata_is_neutral() {
        let calc = SignalCalculator::new(thresholds());
        let result = calc.calculate(&update(), None, &HashSet::new());
        assert_eq!(result.s7_rug_risk, 0.5);
    }

    #[test]
    fn test_s7_young_concentrated_risky_token() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.age_hours = 24.0;
        let meta = TokenMetadata {
            mint: "MintA".to_string(),
            symbol: "ABC".to_string(),
            name: "ABC Token".to_string(),
            decimals: 9,
            on_token_list: false,
            top_holder_pct: 30.0,
            risky_authorities: true,
            first_liquidity_ts: None,
        };
        let result = calc.calculate(&u, Some(&meta), &HashSet::new());
        assert!(result.s7_rug_risk < 0.5);
    }

    #[test]
    fn test_s7_never_exceeds_cap() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.age_hours = 10_000.0;
        let meta = TokenMetadata {
            mint: "MintA".to_string(),
            symbol: "ABC".to_string(),
            name: "ABC Token".to_string(),
            decimals: 9,
            on_token_list: true,
            top_holder_pct: 0.0,
            risky_authorities: false,
            first_liquidity_ts: None,
        };
        let result = calc.calculate(&u, Some(&meta), &HashSet::new());
        assert!(result.s7_rug_risk <= 0.9);
    }

    #[test]
    fn test_s8_zero_when_gates_breached() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.spread_pct = 5.0;
        assert_eq!(calc.calculate(&u, None, &HashSet::new()).s8_tradability, 0.0);
    }

    #[test]
    fn test_s9_is_pinned_placeholder() {
        let calc = SignalCalculator::new(thresholds());
        assert_eq!(
            calc.calculate(&update(), None, &HashSet::new()).s9_relative_strength,
            0.7
        );
    }

    #[test]
    fn test_s10_zero_on_bad_route() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.route.ok = false;
        assert_eq!(
            calc.calculate(&u, None, &HashSet::new()).s10_route_quality,
            0.0
        );
        let mut u = update();
        u.route.hops = 5;
        assert_eq!(
            calc.calculate(&u, None, &HashSet::new()).s10_route_quality,
            0.0
        );
    }

    #[test]
    fn test_n1_membership() {
        let calc = SignalCalculator::new(thresholds());
        let mut list = HashSet::new();
        list.insert("MintA".to_string());
        assert_eq!(calc.calculate(&update(), None, &list).n1_hygiene, 1.0);
        assert_eq!(
            calc.calculate(&update(), None, &HashSet::new()).n1_hygiene,
            0.0
        );
    }

    #[test]
    fn test_data_quality_penalties_accumulate() {
        let calc = SignalCalculator::new(thresholds());
        let mut u = update();
        u.liq_usd = 0.0;
        u.vol24h_usd = 0.0;
        u.bars.clear();
        u.spread_pct = 0.0;
        u.impact_1pct_pct = 0.0;
        let dq = calc.calculate(&u, None, &HashSet::new()).data_quality;
        assert!((dq - (1.0 - 6.0 * 0.08)).abs() < 1e-9);
    }

    #[test]
    fn test_data_quality_floors_at_zero() {
        let mut cfg = thresholds();
        cfg.dq_penalty_per_missing = 0.5;
        let calc = SignalCalculator::new(cfg);
        let mut u = update();
        u.liq_usd = 0.0;
        u.vol24h_usd = 0.0;
        u.bars.clear();
        assert_eq!(calc.calculate(&u, None, &HashSet::new()).data_quality, 0.0);
    }

    #[test]
    fn test_reasons_mention_momentum_and_route() {
        let calc = SignalCalculator::new(thresholds());
        let result = calc.calculate(&update(), None, &HashSet::new());
        assert!(result.reasons.iter().any(|r| r.starts_with("m1h +")));
        assert!(result.reasons.iter().any(|r| r.contains("route 2 hops")));
    }
}
