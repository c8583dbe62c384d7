//! Envelope plus an at-most-once acknowledgement.

use std::sync::OnceLock;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use transport_core::TransportEnvelope;

use crate::errors::{BridgeError, Result};

type AckFuture = BoxFuture<'static, Result<()>>;
type AckFn = Box<dyn FnOnce() -> AckFuture + Send>;

/// An inbound envelope and the function that acknowledges it.
///
/// The function runs at most once, on its own task, so a caller that stops
/// polling [`Delivery::ack`] does not abort it for others. Every call to
/// `ack` returns the outcome of that single run.
pub struct Delivery {
    envelope: TransportEnvelope,
    ack_fn: Mutex<Option<AckFn>>,
    outcome: OnceLock<Shared<AckFuture>>,
}

impl Delivery {
    /// Bind `ack_fn` to `envelope`.
    pub fn new<F>(envelope: TransportEnvelope, ack_fn: F) -> Self
    where
        F: FnOnce() -> AckFuture + Send + 'static,
    {
        Self {
            envelope,
            ack_fn: Mutex::new(Some(Box::new(ack_fn))),
            outcome: OnceLock::new(),
        }
    }

    /// A delivery whose `ack` is a no-op.
    pub fn without_ack(envelope: TransportEnvelope) -> Self {
        Self {
            envelope,
            ack_fn: Mutex::new(None),
            outcome: OnceLock::new(),
        }
    }

    /// The delivered envelope.
    pub fn envelope(&self) -> &TransportEnvelope {
        &self.envelope
    }

    /// Take the envelope, dropping any pending acknowledgement.
    pub fn into_envelope(self) -> TransportEnvelope {
        self.envelope
    }

    /// Acknowledge the delivery.
    pub async fn ack(&self) -> Result<()> {
        let outcome = self.outcome.get_or_init(|| {
            let Some(ack_fn) = self.ack_fn.lock().take() else {
                return futures::future::ready(Ok(())).boxed().shared();
            };
            let task = tokio::spawn(ack_fn());
            async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(BridgeError::Transport(format!("ack task failed: {e}"))),
                }
            }
            .boxed()
            .shared()
        });
        outcome.clone().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.envelope.message_id())
            .field("acked", &self.outcome.get().is_some())
            .finish_non_exhaustive()
    }
}
