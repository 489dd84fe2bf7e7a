use thiserror::Error;

/// Errors produced by the realtime layer.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The fan-out relay could not be reached or a publish failed.
    #[error("Fan-out relay error: {0}")]
    Fanout(#[from] sqlx::Error),

    /// An event payload could not be encoded for the relay.
    #[error("Event encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A notify payload exceeded the relay's size limit.
    #[error("Event payload too large for relay: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RealtimeError>;
