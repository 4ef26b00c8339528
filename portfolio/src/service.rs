//! 💼 Portfolio service: wallet and holdings command handlers.

use crate::config::Config;
use crate::price::PriceSource;
use crate::solana::SolanaRpc;
use crate::store::{Holding, PortfolioStore};
use anyhow::Result;
use log::{error, info, warn};
use soul_bus::{CommandReply, CommandRequest, ConsumerHandle, MessageHandler, StreamBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const HANDLED_COMMANDS: [&str; 5] = ["balance", "holdings", "add_wallet", "remove_wallet", "health"];

pub struct PortfolioService {
    cfg: Config,
    bus: Arc<dyn StreamBus>,
    store: Arc<PortfolioStore>,
    solana: Arc<dyn SolanaRpc>,
    price: Arc<dyn PriceSource>,
    stop: Arc<AtomicBool>,
}

impl PortfolioService {
    pub fn new(
        cfg: Config,
        bus: Arc<dyn StreamBus>,
        store: Arc<PortfolioStore>,
        solana: Arc<dyn SolanaRpc>,
        price: Arc<dyn PriceSource>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            bus,
            store,
            solana,
            price,
            stop,
        }
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

    pub async fn handle_command(&self, request: CommandRequest) {
        info!(
            "Processing command '{}' from user {}",
            request.cmd, request.from.tg_user_id
        );

        let reply = match request.cmd.as_str() {
            "balance" => self.handle_balance(&request).await,
            "holdings" => self.handle_holdings(&request).await,
            "add_wallet" => self.handle_add_wallet(&request),
            "remove_wallet" => self.handle_remove_wallet(&request),
            "health" => self.handle_health(&request).await,
            other => CommandReply::err(&request.corr_id, format!("Unknown command: {}", other)),
        };

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

    async fn handle_balance(&self, request: &CommandRequest) -> CommandReply {
        let wallets = match self.store.list_wallets() {
            Ok(w) => w,
            Err(e) => return CommandReply::err(&request.corr_id, format!("Store error: {}", e)),
        };
        if wallets.is_empty() {
            return CommandReply::ok(
                &request.corr_id,
                "No wallets tracked. Use /add_wallet <address> to add one.",
            );
        }

        let sol_price = self.price.sol_price().await.unwrap_or(0.0);
        let mut message = String::from("💰 Wallet Balances\n\n");
        let mut total_sol = 0.0;
        for wallet in &wallets {
            match self.solana.get_sol_balance(wallet).await {
                Ok(sol) => {
                    total_sol += sol;
                    message.push_str(&format!(
                        "<code>{}</code>\n  {:.4} SOL (${:.2})\n",
                        short(wallet),
                        sol,
                        sol * sol_price
                    ));
                }
                Err(e) => {
                    warn!("⚠️ Balance lookup failed for {}: {}", wallet, e);
                    message.push_str(&format!("<code>{}</code>\n  (unavailable)\n", short(wallet)));
                }
            }
        }
        message.push_str(&format!(
            "\nTotal: {:.4} SOL (${:.2})",
            total_sol,
            total_sol * sol_price
        ));
        CommandReply::ok(&request.corr_id, message)
    }

    async fn handle_holdings(&self, request: &CommandRequest) -> CommandReply {
        let wallets = match self.store.list_wallets() {
            Ok(w) => w,
            Err(e) => return CommandReply::err(&request.corr_id, format!("Store error: {}", e)),
        };
        if wallets.is_empty() {
            return CommandReply::ok(
                &request.corr_id,
                "No wallets tracked. Use /add_wallet <address> to add one.",
            );
        }

        let mut message = String::from("📊 Holdings\n\n");
        let mut any = false;
        for wallet in &wallets {
            let accounts = match self.solana.get_token_accounts(wallet).await {
                Ok(a) => a,
                Err(e) => {
                    warn!("⚠️ Token accounts lookup failed for {}: {}", wallet, e);
                    continue;
                }
            };
            for account in accounts {
                let price = self.price.token_price(&account.mint).await.unwrap_or(0.0);
                let value = account.amount * price;
                any = true;
                message.push_str(&format!(
                    "{}: {:.4} (${:.2})\n",
                    short(&account.mint),
                    account.amount,
                    value
                ));
                // Keep the holdings table current as a side effect.
                let _ = self.store.upsert_holding(&Holding {
                    wallet: wallet.clone(),
                    mint: account.mint,
                    amount: account.amount,
                    value_usd: value,
                });
            }
        }
        if !any {
            return CommandReply::ok(&request.corr_id, "No token holdings found.");
        }
        CommandReply::ok(&request.corr_id, message)
    }

    fn handle_add_wallet(&self, request: &CommandRequest) -> CommandReply {
        let Some(address) = request.arg_str("address") else {
            return CommandReply::err(&request.corr_id, "Missing wallet address.");
        };
        match self.store.add_wallet(&address) {
            Ok(true) => CommandReply::ok(
                &request.corr_id,
                format!("✅ Now tracking <code>{}</code>", short(&address)),
            ),
            Ok(false) => CommandReply::ok(&request.corr_id, "That wallet is already tracked."),
            Err(e) => CommandReply::err(&request.corr_id, format!("Store error: {}", e)),
        }
    }

    fn handle_remove_wallet(&self, request: &CommandRequest) -> CommandReply {
        let Some(address) = request.arg_str("address") else {
            return CommandReply::err(&request.corr_id, "Missing wallet address.");
        };
        match self.store.remove_wallet(&address) {
            Ok(true) => CommandReply::ok(
                &request.corr_id,
                format!("🗑️ Stopped tracking <code>{}</code>", short(&address)),
            ),
            Ok(false) => CommandReply::ok(&request.corr_id, "That wallet was not tracked."),
            Err(e) => CommandReply::err(&request.corr_id, format!("Store error: {}", e)),
        }
    }

    async fn handle_health(&self, request: &CommandRequest) -> CommandReply {
        let bus_ok = self.bus.ping().await.is_ok();
        let store_ok = self.store.check_health();
        let price_ok = self.price.sol_price().await.is_ok();
        CommandReply::ok(
            &request.corr_id,
            format!(
                "💼 Portfolio Health\nBus: {}\nStore: {}\nPrice feed: {}",
                tick(bus_ok),
                tick(store_ok),
                tick(price_ok)
            ),
        )
    }

    pub async fn start(self: &Arc<Self>) -> Result<Vec<ConsumerHandle>> {
        let consumer = soul_bus::consumer_name("portfolio");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = self
            .bus
            .consume(
                &self.cfg.bus.stream_requests,
                &self.cfg.bus.group,
                &consumer,
                self.command_handler(tx),
            )
            .await?;

        let service = self.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if service.stop.load(Ordering::Relaxed) {
                    break;
                }
                service.handle_command(request).await;
            }
        });

        info!("✅ Portfolio service started (consumer {})", consumer);
        Ok(vec![handle])
    }
}

fn tick(ok: bool) -> &'static str {
    if ok {
        "✅ OK"
    } else {
        "❌ Error"
    }
}

fn short(value: &str) -> String {
    if value.chars().count() <= 12 {
        value.to_string()
    } else {
        format!("{}…", value.chars().take(12).collect::<String>())
    }
}
