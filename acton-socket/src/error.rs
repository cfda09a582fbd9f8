//! Error types for the socket core
//!
//! Internal races (double disconnect, late acks, stale timers) are resolved
//! locally and never show up here. These variants cover the failures a caller
//! can actually act on.

use thiserror::Error;

use crate::protocol::Transport;
use crate::session::SessionId;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the socket core
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Writing to a transport channel failed
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The authorization predicate refused the handshake
    #[error("Handshake refused: {0}")]
    Unauthorized(String),

    /// A channel was offered on a transport the configuration disables
    #[error("Transport disabled: {0}")]
    TransportDisabled(Transport),

    /// Session lookup failed where presence was required
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cluster publish/subscribe transport error
    #[error("Pub/sub error: {0}")]
    PubSub(String),

    /// No Tokio runtime available to drive timers
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::PubSub(format!("Redis: {}", err))
    }
}

/// Failure reported by a transport channel on write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel was already closed
    #[error("channel {0} is closed")]
    Closed(String),

    /// The transport rejected the write
    #[error("write to channel {channel} failed: {reason}")]
    WriteFailed {
        /// Channel identifier
        channel: String,
        /// Transport-provided reason
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::Closed("ch-1".to_string());
        assert_eq!(err.to_string(), "channel ch-1 is closed");

        let err: Error = err.into();
        assert!(err.to_string().starts_with("Channel error"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_session_not_found_display() {
        let id = SessionId::new();
        let err = Error::SessionNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
