//! Request/reply correlation for the command fabric.
//!
//! The gateway publishes a `CommandRequest` with a fresh correlation id and
//! remembers which chat asked. Replies resolve through this map; entries
//! that never get a reply are swept after five minutes.

use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const PENDING_TTL: Duration = Duration::from_secs(300);

/// Fresh correlation id for an outbound command request.
pub fn new_corr_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    chat_id: i64,
    created_at: Instant,
}

/// corr_id -> (chat_id, created_at). One row per in-flight command until
/// its reply arrives or it expires.
#[derive(Default)]
pub struct PendingCommands {
    inner: Mutex<HashMap<String, Pending>>,
}

impl PendingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, corr_id: &str, chat_id: i64) {
        self.inner.lock().unwrap().insert(
            corr_id.to_string(),
            Pending {
                chat_id,
                created_at: Instant::now(),
            },
        );
    }

    /// Resolve and remove; `None` for unknown or already-expired ids.
    pub fn take(&self, corr_id: &str) -> Option<i64> {
        let mut inner = self.inner.lock().unwrap();
        let pending = inner.remove(corr_id)?;
        if pending.created_at.elapsed() > PENDING_TTL {
            debug!("Pending command {} expired before reply", corr_id);
            return None;
        }
        Some(pending.chat_id)
    }

    /// Drop entries older than the TTL; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.len();
        inner.retain(|_, p| p.created_at.elapsed() <= PENDING_TTL);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
