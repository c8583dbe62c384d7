//! Frame-level transport seams.
//!
//! The client and server talk to the wire only through [`FrameSink`],
//! [`FrameStream`], and (client side) [`Dialer`]. The WebSocket adapters live
//! in [`ws`]; [`memory`] wires the same seams to in-process channels.

pub mod memory;
pub mod tls;
pub mod ws;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::{BridgeError, CLOSE_GOING_AWAY, CLOSE_NORMAL, Result};
use crate::frame::{ClientFrame, ServerFrame};
use crate::options::BridgeOptions;

/// Inbound half of a stream: decoded frames until the peer closes.
pub type FrameStream<F> = Pin<Box<dyn Stream<Item = Result<F>> + Send>>;

/// Outbound half of a stream.
#[async_trait]
pub trait FrameSink<F: Send + Sync + 'static>: Send {
    /// Encode and write one frame.
    async fn send(&mut self, frame: &F) -> Result<()>;

    /// Close the outbound half, optionally reporting a status to the peer.
    async fn close(&mut self, status: Option<CloseStatus>) -> Result<()>;
}

/// Boxed client-side sink.
pub type ClientSink = Box<dyn FrameSink<ClientFrame>>;
/// Boxed server-side sink.
pub type ServerSink = Box<dyn FrameSink<ServerFrame>>;

/// WebSocket close status reported when a stream ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseStatus {
    /// RFC 6455 close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseStatus {
    /// Normal closure.
    pub fn normal() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: String::new(),
        }
    }

    /// Server is going away.
    pub fn going_away() -> Self {
        Self {
            code: CLOSE_GOING_AWAY,
            reason: "server shutting down".into(),
        }
    }

    /// Status for a stream terminated by `err`.
    pub fn for_error(err: &BridgeError) -> Self {
        let mut reason = err.to_string();
        // Close frame payloads are limited to 125 bytes, two of them the code.
        if reason.len() > 123 {
            let mut cut = 123;
            while !reason.is_char_boundary(cut) {
                cut -= 1;
            }
            reason.truncate(cut);
        }
        Self {
            code: err.close_code(),
            reason,
        }
    }
}

/// Opens client streams.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Dial `options.address` and return both halves of the stream.
    async fn dial(&self, options: &BridgeOptions) -> Result<(ClientSink, FrameStream<ServerFrame>)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{CLOSE_INTERNAL, CLOSE_POLICY};

    #[test]
    fn close_status_for_errors() {
        let status = CloseStatus::for_error(&BridgeError::Protocol("register frame required".into()));
        assert_eq!(status.code, CLOSE_POLICY);
        assert!(status.reason.contains("register frame required"));

        let status = CloseStatus::for_error(&BridgeError::handler("db down"));
        assert_eq!(status.code, CLOSE_INTERNAL);
    }

    #[test]
    fn close_reason_is_truncated() {
        let status = CloseStatus::for_error(&BridgeError::handler("é".repeat(200)));
        assert!(status.reason.len() <= 123);
        assert!(status.reason.is_char_boundary(status.reason.len()));
    }
}
