//! Bridge error taxonomy.

use thiserror::Error;

/// Errors surfaced by the bridge client, server, and sessions.
///
/// `Clone` so a cached acknowledgement outcome can be handed to every caller.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Missing or invalid options. Fails fast at construction.
    #[error("invalid bridge configuration: {0}")]
    Config(String),
    /// No stream is established yet (or the client is between connections).
    #[error("bridge client not started")]
    NotStarted,
    /// The client, server, or session has been closed.
    #[error("bridge closed")]
    Closed,
    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
    /// Internal tasks did not finish within the drain timeout.
    #[error("drain timed out")]
    DrainTimeout,
    /// Dial, read, or write failure on the underlying stream.
    #[error("transport error: {0}")]
    Transport(String),
    /// The peer violated the stream protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// A frame could not be encoded or decoded.
    #[error("frame codec error: {0}")]
    Codec(String),
    /// A server handler callback failed.
    #[error("handler error: {0}")]
    Handler(String),
    /// TLS material could not be loaded.
    #[error("tls error: {0}")]
    Tls(String),
    /// The server refused the stream credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// WebSocket close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code sent while the server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// WebSocket close code for protocol violations.
pub const CLOSE_POLICY: u16 = 1008;
/// WebSocket close code for any other server-side failure.
pub const CLOSE_INTERNAL: u16 = 1011;

impl BridgeError {
    /// Wrap an application error raised inside a handler.
    pub fn handler(err: impl std::fmt::Display) -> Self {
        Self::Handler(err.to_string())
    }

    /// Close code reported to the peer when this error ends a stream.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Protocol(_) | Self::Codec(_) => CLOSE_POLICY,
            _ => CLOSE_INTERNAL,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(BridgeError::Protocol("x".into()).close_code(), CLOSE_POLICY);
        assert_eq!(BridgeError::Codec("x".into()).close_code(), CLOSE_POLICY);
        assert_eq!(BridgeError::handler("boom").close_code(), CLOSE_INTERNAL);
        assert_eq!(BridgeError::Transport("x".into()).close_code(), CLOSE_INTERNAL);
    }

    #[test]
    fn json_error_maps_to_codec() {
        let err: BridgeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, BridgeError::Codec(_)));
    }

    #[test]
    fn display() {
        assert_eq!(BridgeError::NotStarted.to_string(), "bridge client not started");
        assert_eq!(
            BridgeError::handler("boom").to_string(),
            "handler error: boom"
        );
    }
}
