use sigcore::protocol::{EncodeError, MessageType};
use thiserror::Error;

/// Why an outbound frame was not handed to the transport.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("cannot send {0}: not connected")]
    NotConnected(MessageType),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server url must use ws:// or wss://, got {0}")]
    InvalidScheme(String),
    #[error("reconnect base delay must be non-zero and not exceed the maximum")]
    InvalidBackoff,
    #[error("keepalive interval must be non-zero and shorter than the keepalive timeout")]
    InvalidKeepalive,
}

/// Errors published on [`crate::connection::ConnectionManager::errors`].
///
/// Nothing here is fatal; the connection recovers on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("dropped outbound {0}: not connected")]
    SendFailed(MessageType),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
