//! Gateway flows over the in-memory bus and a recording Telegram mock.

use chrono::Utc;
use soul_bus::{CommandReply, CommandRequest, MemoryBus, OutboundAlert, StreamBus};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tg_gateway::config::Config;
use tg_gateway::gateway::Gateway;
use tg_gateway::telegram::{MockTelegram, TelegramChat, TelegramMessage, TelegramUpdate, TelegramUser};

const OWNER: i64 = 42;
const OWNER_CHAT: i64 = 4200;

fn update(user_id: i64, chat_id: i64, text: &str) -> TelegramUpdate {
    TelegramUpdate {
        update_id: 1,
        message: Some(TelegramMessage {
            text: Some(text.to_string()),
            chat: TelegramChat { id: chat_id },
            from: Some(TelegramUser { id: user_id }),
        }),
    }
}

fn gateway() -> (Arc<Gateway>, Arc<MemoryBus>, Arc<MockTelegram>, Config) {
    let mut config = Config::from_env().expect("config");
    config.telegram.owner_id = OWNER;
    config.telegram.bot_token = "test-token".to_string();
    let bus = Arc::new(MemoryBus::new());
    let telegram = Arc::new(MockTelegram::new());
    let stop = Arc::new(AtomicBool::new(false));
    let gw = Arc::new(Gateway::new(
        config.clone(),
        bus.clone(),
        telegram.clone(),
        stop,
    ));
    (gw, bus, telegram, config)
}

#[tokio::test]
async fn test_command_roundtrip_balance() {
    let (gw, bus, telegram, config) = gateway();

    gw.handle_update(update(OWNER, OWNER_CHAT, "/balance")).await;

    // One request with a fresh corr id is on the wire, and one pending row.
    let requests = bus.published(&config.bus.stream_requests);
    assert_eq!(requests.len(), 1);
    let request: CommandRequest = serde_json::from_value(requests[0].clone()).unwrap();
    assert_eq!(request.cmd, "balance");
    assert_eq!(request.from.tg_user_id, OWNER);
    assert_eq!(request.from.role, "owner");
    assert_eq!(gw.pending.len(), 1);

    // The portfolio reply resolves to the originating chat.
    gw.handle_reply(CommandReply::ok(&request.corr_id, "💰 1.5 SOL"))
        .await;
    assert_eq!(
        telegram.last_message_to(OWNER_CHAT).as_deref(),
        Some("💰 1.5 SOL")
    );
    assert!(gw.pending.is_empty());

    // A second reply with the same corr id is dropped silently.
    gw.handle_reply(CommandReply::ok(&request.corr_id, "again"))
        .await;
    assert_eq!(telegram.sent_messages().len(), 1);
}

#[tokio::test]
async fn test_unknown_corr_id_reply_is_dropped() {
    let (gw, _bus, telegram, _config) = gateway();
    gw.handle_reply(CommandReply::ok("ghost", "hello")).await;
    assert!(telegram.sent_messages().is_empty());
}

#[tokio::test]
async fn test_unknown_user_is_denied_with_audit() {
    let (gw, bus, telegram, config) = gateway();

    gw.handle_update(update(999, 888, "/balance")).await;

    assert!(telegram
        .last_message_to(888)
        .unwrap()
        .contains("Access denied"));
    assert_eq!(bus.published_count(&config.bus.stream_requests), 0);

    let audits = bus.published(&config.bus.stream_audit);
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0]["event"], "auth_denied");
}

#[tokio::test]
async fn test_guest_pin_full_lifecycle() {
    let (gw, bus, telegram, _config) = gateway();

    // Owner issues a 5-minute PIN.
    gw.handle_update(update(OWNER, OWNER_CHAT, "/guest 5")).await;
    let pin_message = telegram.last_message_to(OWNER_CHAT).unwrap();
    let pin = pin_message
        .split("<code>")
        .nth(1)
        .and_then(|rest| rest.split("</code>").next())
        .expect("pin in message")
        .to_string();
    assert_eq!(pin.len(), 6);

    let ttl = bus
        .key_ttl(&format!("guest_pin:{}", pin))
        .await
        .unwrap()
        .expect("pin key has ttl");
    assert!(ttl <= std::time::Duration::from_secs(300));
    assert!(ttl >= std::time::Duration::from_secs(290));

    // Another user logs in with the PIN.
    let guest = 777;
    gw.handle_update(update(guest, 7700, &format!("/start {}", pin)))
        .await;
    assert!(telegram
        .last_message_to(7700)
        .unwrap()
        .contains("Guest access granted"));
    assert_eq!(gw.auth.get_user_role(guest), tg_gateway::auth::Role::Guest);

    // PIN is single-use.
    gw.handle_update(update(555, 5500, &format!("/start {}", pin)))
        .await;
    assert!(telegram
        .last_message_to(5500)
        .unwrap()
        .contains("Invalid or expired PIN"));

    // Guests may query but not mute.
    gw.handle_update(update(guest, 7700, "/signals")).await;
    assert_eq!(gw.pending.len(), 1);
    gw.handle_update(update(guest, 7700, "/mute")).await;
    assert!(telegram
        .last_message_to(7700)
        .unwrap()
        .contains("permission"));
}

#[tokio::test]
async fn test_rate_limit_rejects_flood() {
    let (gw, _bus, telegram, config) = gateway();

    for _ in 0..config.limits.rate_limit_msgs_per_min {
        gw.handle_update(update(OWNER, OWNER_CHAT, "/help")).await;
    }
    gw.handle_update(update(OWNER, OWNER_CHAT, "/help")).await;

    assert!(telegram
        .last_message_to(OWNER_CHAT)
        .unwrap()
        .contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_invalid_wallet_address_is_rejected_locally() {
    let (gw, bus, telegram, config) = gateway();

    gw.handle_update(update(OWNER, OWNER_CHAT, "/add_wallet nonsense"))
        .await;

    assert!(telegram
        .last_message_to(OWNER_CHAT)
        .unwrap()
        .contains("valid address"));
    assert_eq!(bus.published_count(&config.bus.stream_requests), 0);
    assert!(gw.pending.is_empty());
}

#[tokio::test]
async fn test_valid_wallet_address_forwards() {
    let (gw, bus, _telegram, config) = gateway();

    gw.handle_update(update(
        OWNER,
        OWNER_CHAT,
        "/add_wallet So11111111111111111111111111111111111111112",
    ))
    .await;

    let requests = bus.published(&config.bus.stream_requests);
    assert_eq!(requests.len(), 1);
    let request: CommandRequest = serde_json::from_value(requests[0].clone()).unwrap();
    assert_eq!(
        request.arg_str("address").as_deref(),
        Some("So11111111111111111111111111111111111111112")
    );
}

#[tokio::test]
async fn test_outbound_alert_relay_and_global_cap() {
    let (gw, _bus, telegram, config) = gateway();

    let alert = |text: &str| OutboundAlert {
        to: 0,
        text: text.to_string(),
        ts: Utc::now(),
        meta: serde_json::json!({"severity": "actionable"}),
    };

    for i in 0..config.limits.global_actionable_max_per_hour {
        gw.handle_outbound_alert(alert(&format!("alert {}", i))).await;
    }
    // Window is full: the next actionable alert is dropped.
    gw.handle_outbound_alert(alert("over the cap")).await;

    let sent = telegram.sent_messages();
    assert_eq!(sent.len(), config.limits.global_actionable_max_per_hour);
    assert!(sent.iter().all(|(chat, _)| *chat == OWNER));

    // Informational severities bypass the window.
    gw.handle_outbound_alert(OutboundAlert {
        to: 0,
        text: "info alert".to_string(),
        ts: Utc::now(),
        meta: serde_json::json!({"severity": "heads_up"}),
    })
    .await;
    assert_eq!(telegram.sent_messages().len(), sent.len() + 1);
}

#[tokio::test]
async fn test_help_is_role_aware() {
    let (gw, bus, telegram, _config) = gateway();

    gw.handle_update(update(OWNER, OWNER_CHAT, "/help")).await;
    let owner_help = telegram.last_message_to(OWNER_CHAT).unwrap();
    assert!(owner_help.contains("/guest"));

    // Install a guest and compare.
    bus.set_ttl("guest_pin:123456", "42", std::time::Duration::from_secs(300))
        .await
        .unwrap();
    gw.handle_update(update(777, 7700, "/start 123456")).await;
    gw.handle_update(update(777, 7700, "/help")).await;
    let guest_help = telegram.last_message_to(7700).unwrap();
    assert!(guest_help.contains("/balance"));
    assert!(!guest_help.contains("/guest"));
}
