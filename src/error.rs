//! Error types for the Deepgram connection pool.
//!
//! Uses thiserror for ergonomic error handling with proper Display implementations.
use thiserror::Error;

/// The crate's error type.
#[derive(Error, Debug)]
pub enum DeepgramPoolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("interrupted while waiting: {0}")]
    Interrupted(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, DeepgramPoolError>;
