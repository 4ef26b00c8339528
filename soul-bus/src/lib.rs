//! 📡 SoulScout Bus - Shared stream transport for all services
//!
//! Every service talks through append-only Redis streams with consumer
//! groups. This crate owns:
//! - The `StreamBus` trait and its Redis implementation
//! - Wire message types for every stream
//! - Reconnection backoff and request/reply correlation helpers
//! - An in-memory bus double for tests

pub mod backoff;
pub mod correlation;
pub mod error;
pub mod memory;
pub mod messages;
pub mod stream_bus;

pub use backoff::Backoff;
pub use correlation::{new_corr_id, PendingCommands};
pub use error::BusError;
pub use memory::MemoryBus;
pub use messages::{
    AlertData, AuditActor, AuditEvent, Band, CommandOrigin, CommandReply, CommandRequest,
    MarketUpdate, OhlcvBar, OutboundAlert, RouteInfo, TokenMetadata,
};
pub use stream_bus::{ConsumerHandle, MessageHandler, RedisStreamBus, StreamBus};

/// Default stream names; each service config can override them.
pub mod streams {
    pub const MARKET_UPDATES: &str = "soul.market.updates";
    pub const ALERTS: &str = "soul.alerts";
    pub const OUTBOUND_ALERTS: &str = "soul.outbound.alerts";
    pub const CMD_REQUESTS: &str = "soul.cmd.requests";
    pub const CMD_REPLIES: &str = "soul.cmd.replies";
    pub const AUDIT: &str = "soul.audit";
}

/// Consumer name stable for the process lifetime, so pending messages are
/// re-delivered to the same consumer after a restart loop.
pub fn consumer_name(service: &str) -> String {
    format!("{}_{}", service, std::process::id())
}
