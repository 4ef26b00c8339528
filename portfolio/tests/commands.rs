//! Portfolio command handling with mocked collaborators.

use portfolio::config::Config;
use portfolio::price::{MockPriceSource, SOL_MINT};
use portfolio::service::PortfolioService;
use portfolio::solana::{MockSolanaRpc, TokenAccount};
use portfolio::store::PortfolioStore;
use soul_bus::{CommandOrigin, CommandReply, CommandRequest, MemoryBus};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const WALLET: &str = "So11111111111111111111111111111111111111112";

fn request(cmd: &str, args: serde_json::Value, corr: &str) -> CommandRequest {
    CommandRequest::new(
        cmd,
        args,
        CommandOrigin {
            tg_user_id: 42,
            role: "owner".to_string(),
        },
        corr.to_string(),
    )
}

fn service(
    solana: MockSolanaRpc,
    price: MockPriceSource,
) -> (Arc<PortfolioService>, Arc<MemoryBus>, Arc<PortfolioStore>, Config) {
    let config = Config::from_env().expect("config");
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(PortfolioStore::open_in_memory().unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let service = Arc::new(PortfolioService::new(
        config.clone(),
        bus.clone(),
        store.clone(),
        Arc::new(solana),
        Arc::new(price),
        stop,
    ));
    (service, bus, store, config)
}

async fn last_reply(bus: &MemoryBus, config: &Config) -> CommandReply {
    let replies = bus.published(&config.bus.stream_replies);
    serde_json::from_value(replies.last().expect("reply published").clone()).unwrap()
}

#[tokio::test]
async fn test_balance_with_no_wallets_is_explanatory() {
    let (service, bus, _store, config) = service(MockSolanaRpc::new(), MockPriceSource::new());

    service
        .handle_command(request("balance", serde_json::json!({}), "corr-1"))
        .await;

    let reply = last_reply(&bus, &config).await;
    assert_eq!(reply.corr_id, "corr-1");
    assert!(reply.ok);
    assert!(reply.message.contains("No wallets tracked"));
}

#[tokio::test]
async fn test_balance_sums_tracked_wallets() {
    let solana = MockSolanaRpc::new().with_balance(WALLET, 1.5);
    let price = MockPriceSource::new().with_price(SOL_MINT, 100.0);
    let (service, bus, store, config) = service(solana, price);
    store.add_wallet(WALLET).unwrap();

    service
        .handle_command(request("balance", serde_json::json!({}), "corr-2"))
        .await;

    let reply = last_reply(&bus, &config).await;
    assert!(reply.message.contains("1.5000 SOL"));
    assert!(reply.message.contains("$150.00"));
}

#[tokio::test]
async fn test_holdings_prices_accounts_and_persists() {
    let solana = MockSolanaRpc::new().with_accounts(
        WALLET,
        vec![TokenAccount {
            mint: "MintA".to_string(),
            amount: 10.0,
        }],
    );
    let price = MockPriceSource::new().with_price("MintA", 2.5);
    let (service, bus, store, config) = service(solana, price);
    store.add_wallet(WALLET).unwrap();

    service
        .handle_command(request("holdings", serde_json::json!({}), "corr-3"))
        .await;

    let reply = last_reply(&bus, &config).await;
    assert!(reply.message.contains("$25.00"));

    let rows = store.holdings_for(WALLET).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mint, "MintA");
    assert_eq!(rows[0].value_usd, 25.0);
}

#[tokio::test]
async fn test_add_then_remove_wallet() {
    let (service, bus, _store, config) = service(MockSolanaRpc::new(), MockPriceSource::new());

    service
        .handle_command(request(
            "add_wallet",
            serde_json::json!({"address": WALLET}),
            "corr-4",
        ))
        .await;
    assert!(last_reply(&bus, &config).await.message.contains("Now tracking"));

    service
        .handle_command(request(
            "add_wallet",
            serde_json::json!({"address": WALLET}),
            "corr-5",
        ))
        .await;
    assert!(last_reply(&bus, &config)
        .await
        .message
        .contains("already tracked"));

    service
        .handle_command(request(
            "remove_wallet",
            serde_json::json!({"address": WALLET}),
            "corr-6",
        ))
        .await;
    assert!(last_reply(&bus, &config)
        .await
        .message
        .contains("Stopped tracking"));
}

#[tokio::test]
async fn test_missing_address_is_an_error_reply() {
    let (service, bus, _store, config) = service(MockSolanaRpc::new(), MockPriceSource::new());

    service
        .handle_command(request("add_wallet", serde_json::json!({}), "corr-7"))
        .await;

    let reply = last_reply(&bus, &config).await;
    assert!(!reply.ok);
    assert!(reply.message.contains("Missing wallet address"));
}

#[tokio::test]
async fn test_health_reports_collaborators() {
    let price = MockPriceSource::new().with_price(SOL_MINT, 100.0);
    let (service, bus, _store, config) = service(MockSolanaRpc::new(), price);

    service
        .handle_command(request("health", serde_json::json!({}), "corr-8"))
        .await;

    let reply = last_reply(&bus, &config).await;
    assert!(reply.message.contains("Bus: ✅ OK"));
    assert!(reply.message.contains("Store: ✅ OK"));
    assert!(reply.message.contains("Price feed: ✅ OK"));
}
