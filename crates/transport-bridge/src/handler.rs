//! Worker-side callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use transport_core::TransportEnvelope;

use crate::errors::{BridgeError, Result};
use crate::frame::Ack;
use crate::session::{BridgeSession, RegisterMeta};

/// Callbacks the server invokes for each stream.
///
/// `on_register` runs before any other callback for a stream. Returning an
/// error from any callback ends that stream only; the error is reported to
/// the peer as the close status. `on_close` runs once after a successful
/// `on_register`, whatever ended the stream.
#[async_trait]
pub trait BridgeHandler: Send + Sync + 'static {
    /// A node registered. Rejecting it closes the stream without `on_close`.
    async fn on_register(&self, session: &Arc<BridgeSession>, meta: &RegisterMeta) -> Result<()>;

    /// An Ingress frame arrived.
    async fn on_ingress(&self, session: &Arc<BridgeSession>, envelope: TransportEnvelope) -> Result<()>;

    /// The node acknowledged a Deliver or Broadcast.
    async fn on_ack(&self, _session: &Arc<BridgeSession>, _ack: Ack) -> Result<()> {
        Ok(())
    }

    /// The node sent a heartbeat.
    async fn on_heartbeat(&self, _session: &Arc<BridgeSession>, _nonce: String) -> Result<()> {
        Ok(())
    }

    /// The stream ended. `reason` is `None` for an orderly close.
    async fn on_close(&self, _session: &Arc<BridgeSession>, _reason: Option<&BridgeError>) {}
}
