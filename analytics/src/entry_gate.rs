//! Hard-threshold entry confirmation and the net-edge test.
//!
//! Both checks are conjunctions of cheap comparisons over the update and
//! the already-computed signals; they decide whether a confidence score is
//! allowed to escalate past the watch band.

use crate::config::Thresholds;
use crate::signals::SignalResult;
use soul_bus::MarketUpdate;

pub struct EntryGate {
    cfg: Thresholds,
}

impl EntryGate {
    pub fn new(cfg: Thresholds) -> Self {
        Self { cfg }
    }

    /// AND of every hard entry condition. Missing momentum bars fail the
    /// gate outright: no confirmation without data.
    pub fn check_entry_conditions(&self, update: &MarketUpdate, signals: &SignalResult) -> bool {
        let c = &self.cfg;

        if update.age_hours < c.min_age_hours {
            return false;
        }
        if update.liq_usd < c.min_liquidity_actionable {
            return false;
        }
        if update.vol24h_usd < c.min_volume_actionable {
            return false;
        }
        if update.spread_pct > c.max_spread_pct || update.impact_1pct_pct > c.max_impact_pct {
            return false;
        }
        if !update.route.ok
            || update.route.hops > c.max_route_hops
            || update.route.deviation_pct > c.max_route_deviation
        {
            return false;
        }

        match update.m1h_pct() {
            Some(m1h) if m1h >= c.min_m1h_pct && m1h <= c.max_m1h_pct => {}
            _ => return false,
        }
        match update.m24h_pct() {
            Some(m24h) if m24h >= c.min_m24h_pct && m24h <= c.max_m24h_pct => {}
            _ => return false,
        }

        if signals.data_quality < c.min_dq_for_actionable {
            return false;
        }

        // Young and risky tokens need an extra confidence margin.
        if update.age_hours < c.young_token_hours
            && signals.s7_rug_risk < 0.5
            && (signals.confidence as i32) < c.min_c_young_risky
        {
            return false;
        }

        true
    }

    /// upside = min(2 * m1h, cap), zero without a "5m" bar;
    /// downside = 2 * impact + spread + lag penalty;
    /// positive `upside - k * downside` passes.
    pub fn check_net_edge(&self, update: &MarketUpdate) -> bool {
        let c = &self.cfg;
        let upside = update
            .m1h_pct()
            .map(|m1h| (m1h * 2.0).min(c.max_upside_cap))
            .unwrap_or(0.0);
        let downside = update.impact_1pct_pct * 2.0 + update.spread_pct + c.lag_penalty;
        upside - c.net_edge_k_factor * downside > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalCalculator;
    use chrono::Utc;
    use soul_bus::{OhlcvBar, RouteInfo};
    use std::collections::{HashMap, HashSet};

    fn update() -> MarketUpdate {
        let mut bars = HashMap::new();
        bars.insert(
            "5m".to_string(),
            OhlcvBar {
                open: 1.0,
                high: 1.06,
                low: 1.0,
                close: 1.05,
                volume_usd: 50_000.0,
            },
        );
        bars.insert(
            "15m".to_string(),
            OhlcvBar {
                open: 1.0,
                high: 1.25,
                low: 0.98,
                close: 1.20,
                volume_usd: 150_000.0,
            },
        );
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

    fn signals_for(update: &MarketUpdate) -> SignalResult {
        let calc = SignalCalculator::new(Thresholds::default());
        let mut signals = calc.calculate(update, None, &HashSet::new());
        signals.confidence = 76;
        signals
    }

    #[test]
    fn test_clean_update_confirms_entry() {
        let gate = EntryGate::new(Thresholds::default());
        let u = update();
        let signals = signals_for(&u);
        assert!(gate.check_entry_conditions(&u, &signals));
        assert!(gate.check_net_edge(&u));
    }

    #[test]
    fn test_each_hard_gate_fails_alone() {
        let gate = EntryGate::new(Thresholds::default());

        let mut u = update();
        u.age_hours = 10.0;
        assert!(!gate.check_entry_conditions(&u, &signals_for(&update())));

        let mut u = update();
        u.liq_usd = 100_000.0;
        assert!(!gate.check_entry_conditions(&u, &signals_for(&u)));

        let mut u = update();
        u.vol24h_usd = 100_000.0;
        assert!(!gate.check_entry_conditions(&u, &signals_for(&u)));

        let mut u = update();
        u.spread_pct = 3.0;
        assert!(!gate.check_entry_conditions(&u, &signals_for(&u)));

        let mut u = update();
        u.route.hops = 4;
        assert!(!gate.check_entry_conditions(&u, &signals_for(&u)));
    }

    #[test]
    fn test_missing_5m_bar_blocks_entry() {
        let gate = EntryGate::new(Thresholds::default());
        let mut u = update();
        u.bars.remove("5m");
        let signals = signals_for(&u);
        assert!(!gate.check_entry_conditions(&u, &signals));
    }

    #[test]
    fn test_overheated_momentum_blocks_entry() {
        let gate = EntryGate::new(Thresholds::default());
        let mut u = update();
        u.bars.insert(
            "5m".to_string(),
            OhlcvBar {
                open: 1.0,
                high: 1.30,
                low: 1.0,
                close: 1.25, // +25%, above max_m1h_pct
                volume_usd: 50_000.0,
            },
        );
        assert!(!gate.check_entry_conditions(&u, &signals_for(&u)));
    }

    #[test]
    fn test_young_risky_needs_high_confidence() {
        let gate = EntryGate::new(Thresholds::default());
        let mut u = update();
        u.age_hours = 48.0;
        let mut signals = signals_for(&u);
        signals.s7_rug_risk = 0.3;

        signals.confidence = 70;
        assert!(!gate.check_entry_conditions(&u, &signals));

        signals.confidence = 85;
        assert!(gate.check_entry_conditions(&u, &signals));
    }

    #[test]
    fn test_net_edge_zero_upside_without_bar() {
        let gate = EntryGate::new(Thresholds::default());
        let mut u = update();
        u.bars.remove("5m");
        assert!(!gate.check_net_edge(&u));
    }

    #[test]
    fn test_net_edge_fails_on_heavy_impact() {
        let gate = EntryGate::new(Thresholds::default());
        let mut u = update();
        u.impact_1pct_pct = 5.0;
        assert!(!gate.check_net_edge(&u));
    }

    #[test]
    fn test_net_edge_upside_is_capped() {
        let cfg = Thresholds::default();
        let gate = EntryGate::new(cfg.clone());
        let mut u = update();
        // +40% momentum, upside capped at 15; downside 2*7 + 0.5 + 0.3 =
        // 14.8, k=2 -> 29.6 > 15, so the cap decides the outcome.
        u.bars.insert(
            "5m".to_string(),
            OhlcvBar {
                open: 1.0,
                high: 1.45,
                low: 1.0,
                close: 1.40,
                volume_usd: 50_000.0,
            },
        );
        u.impact_1pct_pct = 7.0;
        assert!(!gate.check_net_edge(&u));
    }
}
