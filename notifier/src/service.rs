//! 🔔 Notifier service wiring: alert gate-keeping and command replies.

use crate::audit::{AuditLogger, AuditRow};
use crate::config::Config;
use crate::policy::NotifierPolicy;
use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use soul_bus::{
    AlertData, CommandReply, CommandRequest, ConsumerHandle, MessageHandler, StreamBus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const HANDLED_COMMANDS: [&str; 5] = ["status", "mute", "unmute", "silence", "resume"];

pub struct NotifierService {
    cfg: Config,
    bus: Arc<dyn StreamBus>,
    pub policy: NotifierPolicy,
    pub audit: Arc<AuditLogger>,
    stop: Arc<AtomicBool>,
}

impl NotifierService {
    pub fn new(
        cfg: Config,
        bus: Arc<dyn StreamBus>,
        audit: Arc<AuditLogger>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let policy = NotifierPolicy::new(cfg.policy.clone(), bus.clone());
        Self {
            cfg,
            bus,
            policy,
            audit,
            stop,
        }
    }

    pub fn alert_handler(
        self: &Arc<Self>,
        tx: tokio::sync::mpsc::UnboundedSender<AlertData>,
    ) -> MessageHandler {
        Arc::new(move |value| {
            match serde_json::from_value::<AlertData>(value) {
                Ok(alert) => {
                    let _ = tx.send(alert);
                }
                Err(e) => warn!("⚠️ Dropping malformed alert: {}", e),
            }
            Ok(())
        })
    }

    pub fn command_handler(
        self: &Arc<Self>,
        tx: tokio::sync::mpsc::UnboundedSender<CommandRequest>,
    ) -> MessageHandler {
        Arc::new(move |value| {
            match serde_json::from_value::<CommandRequest>(value) {
                Ok(request) => {
                    if HANDLED_COMMANDS.contains(&request.cmd.as_str()) {
                        let _ = tx.send(request);
                    }
                }
                Err(e) => warn!("⚠️ Dropping malformed command request: {}", e),
            }
            Ok(())
        })
    }

    /// Gate one inbound alert and record the decision in the audit log.
    pub async fn handle_alert(&self, alert: AlertData) {
        let (outcome, details) = self
            .policy
            .evaluate(
                &alert,
                &self.cfg.bus.stream_outbound,
                self.cfg.service.owner_chat_id,
            )
            .await;

        self.audit.log_decision(&AuditRow {
            ts: Utc::now(),
            mint: alert.mint.clone(),
            symbol: alert.symbol.clone(),
            severity: alert.severity.to_string(),
            confidence: alert.confidence,
            outcome: outcome.as_str().to_string(),
            details,
            raw_alert: serde_json::to_string(&alert).unwrap_or_default(),
        });
    }

    pub async fn handle_command(&self, request: CommandRequest) {
        info!(
            "Processing command '{}' from user {}",
            request.cmd, request.from.tg_user_id
        );

        let message = match request.cmd.as_str() {
            "status" => self.status_report().await,
            "mute" | "silence" => {
                let minutes = request
                    .arg_i64("minutes")
                    .filter(|m| *m > 0)
                    .unwrap_or(self.cfg.policy.default_mute_min);
                self.policy.set_mute(minutes).await;
                format!("🔇 Notifications muted for {} minutes.", minutes)
            }
            "unmute" | "resume" => {
                self.policy.clear_mute().await;
                "🔊 Notifications have been unmuted.".to_string()
            }
            other => format!("Unknown command: {}", other),
        };

        let reply = CommandReply::ok(&request.corr_id, message);
        let payload = match serde_json::to_value(&reply) {
            Ok(p) => p,
            Err(e) => {
                error!("❌ Reply serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(&self.cfg.bus.stream_replies, &payload).await {
            error!("❌ Failed to publish reply for {}: {}", request.corr_id, e);
        }
    }

    async fn status_report(&self) -> String {
        let muted = self.policy.is_muted().await;
        let bus_ok = self.bus.ping().await.is_ok();
        let store_ok = self.audit.check_health();
        format!(
            "🔔 Notifier Status\nMute: {}\nBus: {}\nStore: {}",
            if muted { "🔇 Muted" } else { "🔊 Active" },
            if bus_ok { "✅ OK" } else { "❌ Error" },
            if store_ok { "✅ OK" } else { "❌ Error" },
        )
    }

    /// Start consumers plus the single processing loop.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<ConsumerHandle>> {
        let consumer = soul_bus::consumer_name("notifier");
        let mut handles = Vec::new();

        let (alert_tx, mut alert_rx) = tokio::sync::mpsc::unbounded_channel();
        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_alerts,
                    &self.cfg.bus.group,
                    &consumer,
                    self.alert_handler(alert_tx),
                )
                .await?,
        );

        let (cmd_tx, mut cmd_rx) = tokio::sync::mpsc::unbounded_channel();
        handles.push(
            self.bus
                .consume(
                    &self.cfg.bus.stream_requests,
                    &self.cfg.bus.group,
                    &consumer,
                    self.command_handler(cmd_tx),
                )
                .await?,
        );

        let service = self.clone();
        tokio::spawn(async move {
            loop {
                if service.stop.load(Ordering::Relaxed) {
                    break;
                }
                tokio::select! {
                    Some(alert) = alert_rx.recv() => service.handle_alert(alert).await,
                    Some(request) = cmd_rx.recv() => service.handle_command(request).await,
                    else => break,
                }
            }
            info!("🛑 Notifier processing loop stopped");
        });

        info!("✅ Notifier service started (consumer {})", consumer);
        Ok(handles)
    }
}
