//! Per-user and global rate limits.
//!
//! Users get a rolling-minute message budget; actionable alerts share one
//! sliding-hour window. Both maps are swept by the housekeeping tick.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct UserWindow {
    window_start: Instant,
    message_count: u32,
}

pub struct RateLimiter {
    msgs_per_min: u32,
    global_actionable_per_hour: usize,
    user_window: Duration,
    actionable_window: Duration,
    user_limits: Mutex<HashMap<i64, UserWindow>>,
    actionable_timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(msgs_per_min: u32, global_actionable_per_hour: usize) -> Self {
        Self::with_windows(
            msgs_per_min,
            global_actionable_per_hour,
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
    }

    /// Window-parameterized constructor for tests.
    pub fn with_windows(
        msgs_per_min: u32,
        global_actionable_per_hour: usize,
        user_window: Duration,
        actionable_window: Duration,
    ) -> Self {
        Self {
            msgs_per_min,
            global_actionable_per_hour,
            user_window,
            actionable_window,
            user_limits: Mutex::new(HashMap::new()),
            actionable_timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Consume one message slot; false means the sender is over budget.
    pub fn check_user_rate_limit(&self, user_id: i64) -> bool {
        let mut limits = self.user_limits.lock().unwrap();
        let now = Instant::now();
        let entry = limits.entry(user_id).or_insert(UserWindow {
            window_start: now,
            message_count: 0,
        });

        if now.duration_since(entry.window_start) > self.user_window {
            entry.window_start = now;
            entry.message_count = 0;
        }
        if entry.message_count >= self.msgs_per_min {
            return false;
        }
        entry.message_count += 1;
        true
    }

    /// True while the actionable window has headroom.
    pub fn check_global_actionable_limit(&self) -> bool {
        let mut timestamps = self.actionable_timestamps.lock().unwrap();
        let cutoff = Instant::now() - self.actionable_window;
        while timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
            timestamps.pop_front();
        }
        timestamps.len() < self.global_actionable_per_hour
    }

    pub fn record_actionable(&self) {
        self.actionable_timestamps
            .lock()
            .unwrap()
            .push_back(Instant::now());
    }

    /// Housekeeping sweep bounding both maps.
    pub fn cleanup_old_entries(&self) {
        let now = Instant::now();
        self.user_limits
            .lock()
            .unwrap()
            .retain(|_, w| now.duration_since(w.window_start) <= self.user_window * 2);

        let cutoff = now - self.actionable_window;
        let mut timestamps = self.actionable_timestamps.lock().unwrap();
        while timestamps.front().map(|t| *t < cutoff).unwrap_or(false) {
            timestamps.pop_front();
        }
    }

    pub fn tracked_users(&self) -> usize {
        self.user_limits.lock().unwrap().len()
    }
}
