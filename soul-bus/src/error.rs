use thiserror::Error;

/// Typed errors at the bus boundary. Pure code never produces these;
/// callers map them to retry, drop, or a user-visible message.
#[derive(Debug, Error)]
pub enum BusError {
    /// Transport is down and the bounded reconnect attempt did not help.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A payload could not be decoded. Poison messages are acked, never
    /// allowed to block the consumer group.
    #[error("payload parse error: {0}")]
    Parse(String),

    /// The server answered something we did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BusError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        BusError::Unavailable(err.to_string())
    }
}
