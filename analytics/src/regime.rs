//! Coarse risk-on/off market regime from a 24h sliding window of SOL
//! observations. Fed only by updates whose base mint is the reference SOL
//! mint; everything else never touches this state.

use crate::config::Thresholds;
use chrono::{DateTime, Duration, Utc};
use log::info;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct RegimePoint {
    sol_price: f64,
    sol_24h_change_pct: f64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegimeInner {
    points: VecDeque<RegimePoint>,
    risk_on: bool,
}

pub struct RegimeDetector {
    cfg: Thresholds,
    inner: Mutex<RegimeInner>,
}

impl RegimeDetector {
    pub fn new(cfg: Thresholds) -> Self {
        Self {
            cfg,
            inner: Mutex::new(RegimeInner::default()),
        }
    }

    pub fn is_risk_on(&self) -> bool {
        self.inner.lock().unwrap().risk_on
    }

    pub fn regime_label(&self) -> &'static str {
        if self.is_risk_on() {
            "RISK-ON"
        } else {
            "RISK-OFF"
        }
    }

    pub fn update(&self, sol_price: f64, sol_24h_change_pct: f64) {
        self.update_at(sol_price, sol_24h_change_pct, Utc::now());
    }

    /// Risk-on requires at least three points in the window, a positive
    /// average 24h change above threshold AND positive price momentum of
    /// the latest point against the prior average.
    pub fn update_at(&self, sol_price: f64, sol_24h_change_pct: f64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();

        inner.points.push_back(RegimePoint {
            sol_price,
            sol_24h_change_pct,
            ts: now,
        });

        let horizon = now - Duration::hours(24);
        while inner
            .points
            .front()
            .map(|p| p.ts < horizon)
            .unwrap_or(false)
        {
            inner.points.pop_front();
        }

        if inner.points.len() < 3 {
            inner.risk_on = false;
            return;
        }

        let n = inner.points.len() as f64;
        let avg_change: f64 =
            inner.points.iter().map(|p| p.sol_24h_change_pct).sum::<f64>() / n;

        let current_price = inner.points.back().map(|p| p.sol_price).unwrap_or(sol_price);
        let prior: Vec<f64> = inner
            .points
            .iter()
            .take(inner.points.len() - 1)
            .map(|p| p.sol_price)
            .collect();
        let avg_price = prior.iter().sum::<f64>() / prior.len() as f64;
        let price_momentum = if avg_price > 0.0 {
            ((current_price / avg_price) - 1.0) * 100.0
        } else {
            0.0
        };

        let new_risk_on = avg_change > self.cfg.risk_on_sol_change_threshold
            && price_momentum > self.cfg.risk_on_momentum_threshold;

        if new_risk_on != inner.risk_on {
            info!(
                "🌡️ Risk regime changed to {}: SOL avg change {:.2}%, momentum {:.2}%",
                if new_risk_on { "RISK-ON" } else { "RISK-OFF" },
                avg_change,
                price_momentum
            );
        }
        inner.risk_on = new_risk_on;
    }

    pub fn window_len(&self) -> usize {
        self.inner.lock().unwrap().points.len()
    }
}
