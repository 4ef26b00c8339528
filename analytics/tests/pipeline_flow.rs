//! End-to-end pipeline scenarios over the in-memory bus.

use analytics::config::Config;
use analytics::pipeline::AnalyticsPipeline;
use analytics::store::MockTokenStore;
use chrono::Utc;
use soul_bus::{
    AlertData, Band, CommandOrigin, CommandRequest, MarketUpdate, MemoryBus, OhlcvBar, RouteInfo,
    TokenMetadata,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn clean_update(mint: &str) -> MarketUpdate {
    let mut bars = HashMap::new();
    bars.insert(
        "5m".to_string(),
        OhlcvBar {
            open: 1.0,
            high: 1.06,
            low: 1.0,
            close: 1.05,
            volume_usd: 50_000.0,
        },
    );
    bars.insert(
        "15m".to_string(),
        OhlcvBar {
            open: 1.0,
            high: 1.25,
            low: 0.98,
            close: 1.20,
            volume_usd: 150_000.0,
        },
    );
    MarketUpdate {
        pool_id: format!("pool-{}", mint),
        mint_base: mint.to_string(),
        mint_quote: "So11111111111111111111111111111111111111112".to_string(),
        symbol: mint.to_string(),
        price: 1.05,
        liq_usd: 600_000.0,
        vol24h_usd: 3_000_000.0,
        spread_pct: 0.5,
        impact_1pct_pct: 0.3,
        age_hours: 200.0,
        route: RouteInfo {
            ok: true,
            hops: 2,
            deviation_pct: 0.2,
        },
        bars,
        ts: Utc::now(),
    }
}

fn pipeline_with(
    store: MockTokenStore,
) -> (Arc<AnalyticsPipeline>, Arc<MemoryBus>, Config) {
    let config = Config::from_env().expect("config");
    let bus = Arc::new(MemoryBus::new());
    let stop = Arc::new(AtomicBool::new(false));
    let pipeline = Arc::new(AnalyticsPipeline::new(
        config.clone(),
        bus.clone(),
        Arc::new(store),
        stop,
    ));
    (pipeline, bus, config)
}

#[tokio::test]
async fn test_clean_actionable_emits_one_alert() {
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new());

    pipeline.process_update(clean_update("A")).await;

    let alerts = bus.published(&config.bus.stream_alerts);
    assert_eq!(alerts.len(), 1, "exactly one alert expected");

    let alert: AlertData = serde_json::from_value(alerts[0].clone()).unwrap();
    assert_eq!(alert.severity, Band::Actionable);
    assert_eq!(alert.mint, "A");
    assert!(alert.confidence >= 70, "confidence {} too low", alert.confidence);
    assert!(!alert.lines.is_empty());
    assert!(alert.plan.contains("entry tranche"));
    assert_eq!(alert.sol_path, "2 hops");

    // Emitting armed the per-mint cooldown.
    assert!(pipeline.throttle.should_throttle("A", Band::Actionable));
}

#[tokio::test]
async fn test_repeat_update_is_throttled_and_cache_bounded() {
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new());

    pipeline.process_update(clean_update("A")).await;
    pipeline.process_update(clean_update("A")).await;
    pipeline.process_update(clean_update("A")).await;

    assert_eq!(bus.published_count(&config.bus.stream_alerts), 1);
    assert_eq!(pipeline.signal_cache.len(), 1);
}

#[tokio::test]
async fn test_young_risky_token_stays_quiet() {
    let meta = TokenMetadata {
        mint: "A".to_string(),
        symbol: "A".to_string(),
        name: "A Token".to_string(),
        decimals: 9,
        on_token_list: false,
        top_holder_pct: 30.0,
        risky_authorities: true,
        first_liquidity_ts: None,
    };
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new().with_token(meta));

    let mut update = clean_update("A");
    update.age_hours = 24.0;
    pipeline.process_update(update).await;

    assert_eq!(bus.published_count(&config.bus.stream_alerts), 0);
    let cached = pipeline.signal_cache.get("A").expect("cached signal");
    assert_eq!(cached.band, Band::Watch);
}

#[tokio::test]
async fn test_sol_update_moves_regime_not_signals() {
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new());

    let handler = pipeline.market_handler();
    for i in 0..3 {
        let mut update = clean_update("So11111111111111111111111111111111111111112");
        update.price = 100.0 + i as f64;
        handler(serde_json::to_value(&update).unwrap()).unwrap();
    }

    assert!(pipeline.queue.is_empty(), "SOL updates must not be scored");
    assert_eq!(pipeline.signal_cache.len(), 0);
    assert_eq!(bus.published_count(&config.bus.stream_alerts), 0);
    // Three rising observations with +20% 15m change flip the regime on.
    assert!(pipeline.regime.is_risk_on());
}

#[tokio::test]
async fn test_malformed_update_is_dropped_not_requeued() {
    let (pipeline, _bus, _config) = pipeline_with(MockTokenStore::new());
    let handler = pipeline.market_handler();
    // Parse failures must be acked (Ok) so they never wedge the group.
    assert!(handler(serde_json::json!({"garbage": true})).is_ok());
    assert!(pipeline.queue.is_empty());
}

#[tokio::test]
async fn test_signals_command_replies_from_cache() {
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new());
    pipeline.process_update(clean_update("A")).await;

    let request = CommandRequest::new(
        "signals",
        serde_json::json!({}),
        CommandOrigin {
            tg_user_id: 1,
            role: "owner".to_string(),
        },
        "corr-42".to_string(),
    );
    pipeline.handle_command(request).await;

    let replies = bus.published(&config.bus.stream_replies);
    assert_eq!(replies.len(), 1);
    let reply: soul_bus::CommandReply = serde_json::from_value(replies[0].clone()).unwrap();
    assert_eq!(reply.corr_id, "corr-42");
    assert!(reply.ok);
    assert!(reply.message.contains('A'));
    assert!(reply.data.is_some());
}

#[tokio::test]
async fn test_signals_command_with_empty_cache() {
    let (pipeline, bus, config) = pipeline_with(MockTokenStore::new());
    let request = CommandRequest::new(
        "signals",
        serde_json::json!({}),
        CommandOrigin {
            tg_user_id: 1,
            role: "guest".to_string(),
        },
        "corr-7".to_string(),
    );
    pipeline.handle_command(request).await;

    let replies = bus.published(&config.bus.stream_replies);
    let reply: soul_bus::CommandReply = serde_json::from_value(replies[0].clone()).unwrap();
    assert!(reply.message.contains("No recent signals"));
}

#[tokio::test]
async fn test_queue_backpressure_rejects_when_full() {
    let (pipeline, _bus, config) = pipeline_with(MockTokenStore::new());
    let handler = pipeline.market_handler();

    for i in 0..config.cache.queue_capacity {
        let update = clean_update(&format!("M{}", i));
        assert!(handler(serde_json::to_value(&update).unwrap()).is_ok());
    }
    // One more than capacity: the handler refuses so the bus redelivers.
    let overflow = clean_update("overflow");
    assert!(handler(serde_json::to_value(&overflow).unwrap()).is_err());
}
