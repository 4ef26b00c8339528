//! 🤖 Gateway core: command routing, reply correlation, alert relay.
//!
//! Every inbound chat message runs rate limit -> parse -> auth -> local
//! answer or forward-with-correlation. Replies resolve through the pending
//! map; outbound alerts relay to the owner chat under the global
//! actionable window.

use crate::auth::{AuthManager, Role};
use crate::config::Config;
use crate::parser::{self, ParsedCommand};
use crate::rate_limit::RateLimiter;
use crate::telegram::{TelegramApi, TelegramUpdate};
use anyhow::Result;
use log::{debug, error, info, warn};
use rand::Rng;
use soul_bus::{
    new_corr_id, AuditEvent, CommandOrigin, CommandReply, CommandRequest, ConsumerHandle,
    MessageHandler, OutboundAlert, PendingCommands, StreamBus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Gateway {
    cfg: Config,
    bus: Arc<dyn StreamBus>,
    telegram: Arc<dyn TelegramApi>,
    pub auth: AuthManager,
    pub rate_limiter: RateLimiter,
    pub pending: PendingCommands,
    stop: Arc<AtomicBool>,
}

fn is_valid_address(addr: &str) -> bool {
    bs58::decode(addr)
        .into_vec()
        .map(|bytes| bytes.len() == 32)
        .unwrap_or(false)
}

impl Gateway {
    pub fn new(
        cfg: Config,
        bus: Arc<dyn StreamBus>,
        telegram: Arc<dyn TelegramApi>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let auth = AuthManager::new(cfg.telegram.owner_id);
        let rate_limiter = RateLimiter::new(
            cfg.limits.rate_limit_msgs_per_min,
            cfg.limits.global_actionable_max_per_hour,
        );
        Self {
            cfg,
            bus,
            telegram,
            auth,
            rate_limiter,
            pending: PendingCommands::new(),
            stop,
        }
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.telegram.send_message(chat_id, text).await {
            error!("❌ Failed to send message to {}: {}", chat_id, e);
        }
    }

    pub async fn handle_update(&self, update: TelegramUpdate) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
            return;
        };
        let Some(from) = message.from else {
            return;
        };
        let user_id = from.id;
        let chat_id = message.chat.id;

        if !self.rate_limiter.check_user_rate_limit(user_id) {
            self.send(chat_id, "Rate limit exceeded. Please slow down.")
                .await;
            return;
        }

        let Some(parsed) = parser::parse(&text) else {
            self.send(
                chat_id,
                "Invalid command format. Use /help for available commands.",
            )
            .await;
            return;
        };

        self.handle_command(parsed, user_id, chat_id).await;
    }

    async fn handle_command(&self, cmd: ParsedCommand, user_id: i64, chat_id: i64) {
        // /start <PIN> is the one command available before any role exists.
        if cmd.command == "start" && cmd.args.len() == 1 {
            self.handle_guest_login(&cmd.args[0], user_id, chat_id).await;
            return;
        }

        let role = self.auth.get_user_role(user_id);
        if role == Role::Unknown {
            self.send(chat_id, "Access denied. Contact the owner for access.")
                .await;
            self.publish_audit("auth_denied", user_id, role, "Access denied")
                .await;
            return;
        }

        if !self.auth.is_command_allowed(&cmd.command, role) {
            self.send(chat_id, "You don't have permission to use this command.")
                .await;
            self.publish_audit(
                "auth_denied",
                user_id,
                role,
                format!("Denied command /{}", cmd.command),
            )
            .await;
            return;
        }

        if self.handle_local_command(&cmd, user_id, chat_id, role).await {
            return;
        }

        self.forward_command(&cmd, user_id, chat_id, role).await;
        self.publish_audit(
            "cmd_used",
            user_id,
            role,
            format!("User used command: /{}", cmd.command),
        )
        .await;
    }

    /// Commands the gateway answers without touching the bus fabric.
    async fn handle_local_command(
        &self,
        cmd: &ParsedCommand,
        user_id: i64,
        chat_id: i64,
        role: Role,
    ) -> bool {
        match cmd.command.as_str() {
            "start" => {
                self.send(
                    chat_id,
                    "Welcome to SoulScout! Use /help for available commands.",
                )
                .await;
                true
            }
            "help" => {
                let mut help_text = String::from(
                    "Available commands:\n\
                     /balance - Show wallet balances\n\
                     /holdings - Show current positions\n\
                     /signals [mint|window] - Show recent signals\n\
                     /health - System health check\n",
                );
                if role == Role::Owner {
                    help_text.push_str(
                        "/silence [minutes] - Silence alerts\n\
                         /resume - Resume alerts\n\
                         /mute [minutes] - Mute notifier\n\
                         /unmute - Unmute notifier\n\
                         /status - Notifier status\n\
                         /add_wallet <address> - Add wallet to monitor\n\
                         /remove_wallet <address> - Remove wallet\n\
                         /guest [minutes] - Generate guest PIN\n",
                    );
                }
                self.send(chat_id, &help_text).await;
                true
            }
            "guest" if role == Role::Owner => {
                self.issue_guest_pin(cmd, user_id, chat_id).await;
                true
            }
            _ => false,
        }
    }

    async fn issue_guest_pin(&self, cmd: &ParsedCommand, user_id: i64, chat_id: i64) {
        let minutes = cmd
            .int_arg(0)
            .filter(|m| *m > 0)
            .unwrap_or(self.cfg.limits.guest_default_minutes);
        let pin: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        let key = format!("guest_pin:{}", pin);

        match self
            .bus
            .set_ttl(
                &key,
                &user_id.to_string(),
                Duration::from_secs(minutes as u64 * 60),
            )
            .await
        {
            Ok(()) => {
                self.send(
                    chat_id,
                    &format!(
                        "Guest PIN: <code>{}</code>\nValid for {} minutes",
                        pin, minutes
                    ),
                )
                .await;
                self.publish_audit(
                    "guest_pin_issued",
                    user_id,
                    Role::Owner,
                    format!("Guest PIN issued for {} minutes", minutes),
                )
                .await;
            }
            Err(e) => {
                warn!("⚠️ Failed to store guest PIN: {}", e);
                self.send(chat_id, "Failed to generate guest PIN").await;
            }
        }
    }

    async fn handle_guest_login(&self, pin: &str, user_id: i64, chat_id: i64) {
        let key = format!("guest_pin:{}", pin);
        let stored = self.bus.get_key(&key).await.unwrap_or(None);
        if stored.is_none() {
            self.send(chat_id, "Invalid or expired PIN").await;
            return;
        }

        // The session inherits whatever lifetime the PIN had left.
        let residual = self
            .bus
            .key_ttl(&key)
            .await
            .unwrap_or(None)
            .unwrap_or(Duration::from_secs(
                self.cfg.limits.guest_default_minutes as u64 * 60,
            ));
        self.auth.set_guest_session(user_id, residual);

        if let Err(e) = self.bus.delete_key(&key).await {
            warn!("⚠️ Failed to delete consumed guest PIN: {}", e);
        }

        self.send(
            chat_id,
            "Guest access granted! Use /help for available commands.",
        )
        .await;
        self.publish_audit(
            "guest_login",
            user_id,
            Role::Guest,
            "Guest access granted via PIN",
        )
        .await;
    }

    /// Build the command request, remember the correlation, publish.
    async fn forward_command(&self, cmd: &ParsedCommand, user_id: i64, chat_id: i64, role: Role) {
        let mut args = serde_json::Map::new();
        match cmd.command.as_str() {
            "signals" => {
                if let Some(window) = cmd.arg(0) {
                    args.insert("window".to_string(), serde_json::json!(window));
                }
            }
            "add_wallet" | "remove_wallet" => {
                let Some(address) = cmd.arg(0) else {
                    self.send(chat_id, "Usage: /add_wallet <address>").await;
                    return;
                };
                if !is_valid_address(address) {
                    self.send(chat_id, "That does not look like a valid address.")
                        .await;
                    return;
                }
                args.insert("address".to_string(), serde_json::json!(address));
            }
            "silence" | "mute" => {
                if let Some(minutes) = cmd.int_arg(0) {
                    args.insert("minutes".to_string(), serde_json::json!(minutes));
                }
            }
            _ => {}
        }

        let corr_id = new_corr_id();
        let request = CommandRequest::new(
            &cmd.command,
            serde_json::Value::Object(args),
            CommandOrigin {
                tg_user_id: user_id,
                role: role.as_str().to_string(),
            },
            corr_id.clone(),
        );

        self.pending.insert(&corr_id, chat_id);

        let payload = match serde_json::to_value(&request) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ Request serialization failed: {}", e);
                self.pending.take(&corr_id);
                return;
            }
        };
        if let Err(e) = self
            .bus
            .publish(&self.cfg.bus.stream_requests, &payload)
            .await
        {
            error!("❌ Failed to publish command request: {}", e);
            self.pending.take(&corr_id);
            self.send(chat_id, "Service temporarily unavailable, try again later.")
                .await;
        }
    }

    /// Resolve a reply through the pending map; unknown ids are dropped.
    pub async fn handle_reply(&self, reply: CommandReply) {
        match self.pending.take(&reply.corr_id) {
            Some(chat_id) => {
                self.send(chat_id, &reply.message).await;
            }
            None => {
                warn!(
                    "⚠️ Reply for unknown or expired correlation ID: {}",
                    reply.corr_id
                );
            }
        }
    }

    /// Relay an outbound alert, consuming the global actionable window for
    /// actionable/high-conviction severities.
    pub async fn handle_outbound_alert(&self, alert: OutboundAlert) {
        let severity = alert
            .meta
            .get("severity")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if severity == "actionable" || severity == "high_conviction" {
            if !self.rate_limiter.check_global_actionable_limit() {
                warn!("⚠️ Global actionable limit reached, dropping alert");
                return;
            }
            self.rate_limiter.record_actionable();
        }

        let chat_id = if alert.to != 0 {
            alert.to
        } else {
            self.cfg.telegram.owner_id
        };
        self.send(chat_id, &alert.text).await;
    }

    async fn publish_audit(
        &self,
        event: &str,
        user_id: i64,
        role: Role,
        detail: impl Into<String>,
    ) {
        let audit = AuditEvent::new(event, user_id, role.as_str(), detail);
        let Ok(payload) = serde_json::to_value(&audit) else {
            return;
        };
        if let Err(e) = self.bus.publish(&self.cfg.bus.stream_audit, &payload).await {
            debug!("Audit publish failed: {}", e);
        }
    }

    /// Minute tick: expired guest sessions, stale rate-limit entries, and
    /// pending commands past the five-minute TTL.
    pub fn housekeeping(&self) {
        let sessions = self.auth.cleanup_expired_sessions();
        self.rate_limiter.cleanup_old_entries();
        let commands = self.pending.sweep();
        if sessions + commands > 0 {
            debug!(
                "🧹 Housekeeping: {} sessions, {} pending commands removed",
                sessions, commands
            );
        }
    }

    pub fn reply_handler(
        self: &Arc<Self>,
        tx: tokio::sync::mpsc::UnboundedSender<CommandReply>,
    ) -> MessageHandler {
        Arc::new(move |value| {
            match serde_json::from_value::<CommandReply>(value) {
                Ok(reply) => {
                    let _ = tx.send(reply);
                }
                Err(e) => warn!("⚠️ Dropping malformed command reply: {}", e),
            }
            Ok(())
        })
    }

    pub fn outbound_handler(
        self: &Arc<Self>,
        tx: tokio::sync::mpsc::UnboundedSender<OutboundAlert>,
    ) -> MessageHandler {
        Arc::new(move |value| {
            match serde_json::from_value::<OutboundAlert>(value) {
                Ok(alert) => {
                    let _ = tx.send(alert);
                }
                Err(e) => warn!("⚠️ Dropping malformed outbound alert: {}", e),
            }
            Ok(())
        })
    }

    /// Start bus consumers, the processing loop, the Telegram poller and
    /// the housekeeping tick.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<ConsumerHandle>> {
        let consumer = soul_bus::consumer_name("tg_gateway");
        let mut handles = Vec::new();

        let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_replies,
                    &self.cfg.bus.group,
                    &consumer,
                    self.reply_handler(reply_tx),
                )
                .await?,
        );

        let (alert_tx, mut alert_rx) = tokio::sync::mpsc::unbounded_channel();
        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_outbound,
                    &self.cfg.bus.group,
                    &consumer,
                    self.outbound_handler(alert_tx),
                )
                .await?,
        );

        let gateway = self.clone();
        tokio::spawn(async move {
            loop {
                if gateway.stop.load(Ordering::Relaxed) {
                    break;
                }
                tokio::select! {
                    Some(reply) = reply_rx.recv() => gateway.handle_reply(reply).await,
                    Some(alert) = alert_rx.recv() => gateway.handle_outbound_alert(alert).await,
                    else => break,
                }
            }
        });

        let poller = self.clone();
        tokio::spawn(async move {
            poller.poll_loop().await;
        });

        let janitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                if janitor.stop.load(Ordering::Relaxed) {
                    break;
                }
                janitor.housekeeping();
            }
        });

        info!("✅ Gateway started (consumer {})", consumer);
        Ok(handles)
    }

    /// Long-poll loop against the Telegram API.
    async fn poll_loop(&self) {
        let mut last_update_id: i64 = 0;
        info!("🎧 Started Telegram polling");

        while !self.stop.load(Ordering::Relaxed) {
            match self
                .telegram
                .get_updates(last_update_id + 1, self.cfg.telegram.poll_timeout_sec)
                .await
            {
                Ok(updates) => {
                    let idle = updates.is_empty();
                    for update in updates {
                        if update.update_id > last_update_id {
                            last_update_id = update.update_id;
                        }
                        self.handle_update(update).await;
                    }
                    if idle {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
                Err(e) => {
                    error!("❌ Polling error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
        info!("🛑 Stopped Telegram polling");
    }
}
