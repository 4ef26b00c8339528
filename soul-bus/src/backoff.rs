//! Exponential backoff with jitter, shared by every outbound I/O path.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff: base 1s, doubling, capped at 30s, with ±30% jitter.
/// A successful call resets the sequence. `max_attempts` bounds retry loops
/// for one-shot calls; reconnect loops run unbounded (`None`).
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempts: 0,
        }
    }

    /// Unbounded reconnect schedule: 1s, 2s, 4s ... 30s.
    pub fn reconnect() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), None)
    }

    /// Bounded per-call retry schedule, 5 attempts typical.
    pub fn call() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), Some(5))
    }

    /// Next delay to sleep before retrying, or `None` once the attempt
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        let exp = self.base.as_millis().saturating_mul(1u128 << self.attempts.min(30)) as u64;
        let capped = exp.min(self.cap.as_millis() as u64);
        self.attempts += 1;
        Some(jitter(Duration::from_millis(capped)))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Call after a success so the next failure starts from the base delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Apply ±30% jitter so a fleet of consumers does not reconnect in lockstep.
pub fn jitter(d: Duration) -> Duration {
    let ms = d.as_millis() as f64;
    let factor = rand::thread_rng().gen_range(0.7..=1.3);
    Duration::from_millis((ms * factor) as u64)
}
