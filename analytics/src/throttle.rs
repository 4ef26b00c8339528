//! 🛡️ Alert throttling
//!
//! Per-mint cooldowns plus global and per-band window caps over one
//! ordered history of emitted alerts. History is pruned to the maximum
//! configured cooldown so it never grows unbounded.

use crate::config::ThrottleConfig;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use soul_bus::Band;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub mint: String,
    pub band: Band,
    pub ts: DateTime<Utc>,
}

pub struct AlertThrottle {
    cfg: ThrottleConfig,
    history: Mutex<VecDeque<AlertRecord>>,
}

impl AlertThrottle {
    pub fn new(cfg: ThrottleConfig) -> Self {
        Self {
            cfg,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn should_throttle(&self, mint: &str, band: Band) -> bool {
        self.should_throttle_at(mint, band, Utc::now())
    }

    /// True when any of: the mint is inside its band cooldown, the global
    /// window cap is reached, or the band's own window cap is reached.
    pub fn should_throttle_at(&self, mint: &str, band: Band, now: DateTime<Utc>) -> bool {
        let history = self.history.lock().unwrap();

        let cooldown = Duration::minutes(self.cfg.cooldown_minutes(band));
        for record in history.iter() {
            if record.mint == mint && now - record.ts < cooldown {
                debug!(
                    "Throttling {} ({}): cooldown {}min not elapsed",
                    mint,
                    band,
                    self.cfg.cooldown_minutes(band)
                );
                return true;
            }
        }

        let window = Duration::minutes(self.cfg.rate_limit_window_min);
        let in_window = history.iter().filter(|r| now - r.ts < window).count();
        if in_window >= self.cfg.max_alerts_per_window {
            debug!(
                "Global alert cap reached: {} in {}min window",
                in_window, self.cfg.rate_limit_window_min
            );
            return true;
        }

        let band_in_window = history
            .iter()
            .filter(|r| r.band == band && now - r.ts < window)
            .count();
        if band_in_window >= self.cfg.band_cap(band) {
            debug!(
                "Band cap reached for {}: {} in {}min window",
                band, band_in_window, self.cfg.rate_limit_window_min
            );
            return true;
        }

        false
    }

    pub fn record_alert(&self, mint: &str, band: Band) {
        self.record_alert_at(mint, band, Utc::now());
    }

    pub fn record_alert_at(&self, mint: &str, band: Band, now: DateTime<Utc>) {
        let mut history = self.history.lock().unwrap();
        history.push_back(AlertRecord {
            mint: mint.to_string(),
            band,
            ts: now,
        });

        // Records older than the longest cooldown can never influence a
        // decision again.
        let horizon = now - Duration::minutes(self.cfg.max_cooldown_minutes());
        while history.front().map(|r| r.ts < horizon).unwrap_or(false) {
            history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}
