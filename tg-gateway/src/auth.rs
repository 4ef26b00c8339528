//! Role resolution and guest sessions.
//!
//! One configured owner, short-lived PIN-granted guests, everyone else
//! unknown. Expired sessions are swept by the housekeeping tick.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    Guest,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Guest => "guest",
            Role::Owner => "owner",
        }
    }
}

const GUEST_COMMANDS: [&str; 6] = ["start", "help", "balance", "holdings", "signals", "health"];

pub struct AuthManager {
    owner_id: i64,
    guest_sessions: Mutex<HashMap<i64, Instant>>,
}

impl AuthManager {
    pub fn new(owner_id: i64) -> Self {
        Self {
            owner_id,
            guest_sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_user_role(&self, tg_user_id: i64) -> Role {
        if tg_user_id == self.owner_id {
            return Role::Owner;
        }
        let sessions = self.guest_sessions.lock().unwrap();
        match sessions.get(&tg_user_id) {
            Some(expires_at) if Instant::now() < *expires_at => Role::Guest,
            _ => Role::Unknown,
        }
    }

    pub fn is_command_allowed(&self, cmd: &str, role: Role) -> bool {
        match role {
            Role::Owner => true,
            Role::Guest => GUEST_COMMANDS.contains(&cmd),
            Role::Unknown => false,
        }
    }

    pub fn set_guest_session(&self, tg_user_id: i64, ttl: Duration) {
        self.guest_sessions
            .lock()
            .unwrap()
            .insert(tg_user_id, Instant::now() + ttl);
        info!(
            "Guest session created for user {} (expires in {}s)",
            tg_user_id,
            ttl.as_secs()
        );
    }

    pub fn cleanup_expired_sessions(&self) -> usize {
        let mut sessions = self.guest_sessions.lock().unwrap();
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|user_id, expires_at| {
            let live = now < *expires_at;
            if !live {
                debug!("Removing expired session for user {}", user_id);
            }
            live
        });
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.guest_sessions.lock().unwrap().len()
    }
}
