//! Server-side handle to one registered stream.

use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use transport_core::{Principal, StreamMetadata, TransportEnvelope, normalize_envelope};

use crate::errors::{BridgeError, Result};
use crate::frame::{EnvelopeFrame, HeartbeatFrame, RegisterFrame, ServerFrame};
use crate::metrics::FRAMES_SENT_TOTAL;
use crate::transport::{CloseStatus, ServerSink};

/// What a node announced when it registered, plus what the server learned
/// from the upgrade request.
#[derive(Clone, Debug, Default)]
pub struct RegisterMeta {
    /// Node id from the Register frame.
    pub node_id: String,
    /// Namespace from the Register frame.
    pub namespace: String,
    /// Bridge protocol version from the Register frame.
    pub bridge_version: String,
    /// Envelope versions the node understands.
    pub supported_versions: Vec<String>,
    /// Upgrade request headers, lowercase keys.
    pub metadata: StreamMetadata,
    /// Trace id carried by the upgrade request.
    pub trace_id: Option<String>,
    /// Authenticated identity, when an authenticator is installed.
    pub principal: Option<Principal>,
}

impl RegisterMeta {
    /// Combine a Register frame with connection context.
    pub fn from_frame(
        frame: RegisterFrame,
        metadata: StreamMetadata,
        trace_id: Option<String>,
        principal: Option<Principal>,
    ) -> Self {
        Self {
            node_id: frame.node_id,
            namespace: frame.namespace,
            bridge_version: frame.bridge_version,
            supported_versions: frame.supported_versions,
            metadata,
            trace_id,
            principal,
        }
    }
}

/// A registered stream. Sends are serialized by an internal lock.
pub struct BridgeSession {
    id: String,
    meta: RegisterMeta,
    sink: Mutex<ServerSink>,
    token: CancellationToken,
    connected_at: Instant,
}

impl BridgeSession {
    pub(crate) fn new(meta: RegisterMeta, sink: ServerSink, token: CancellationToken) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            meta,
            sink: Mutex::new(sink),
            token,
            connected_at: Instant::now(),
        }
    }

    /// Unique session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Immutable registration metadata.
    pub fn metadata(&self) -> &RegisterMeta {
        &self.meta
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Normalize `envelope` and send it as a Deliver frame.
    pub async fn send_deliver(&self, mut envelope: TransportEnvelope) -> Result<()> {
        normalize_envelope(&mut envelope);
        self.send(ServerFrame::Deliver(EnvelopeFrame { envelope })).await
    }

    /// Normalize `envelope` and send it as a Broadcast frame.
    pub async fn send_broadcast(&self, mut envelope: TransportEnvelope) -> Result<()> {
        normalize_envelope(&mut envelope);
        self.send(ServerFrame::Broadcast(EnvelopeFrame { envelope })).await
    }

    /// Send a Heartbeat frame.
    pub async fn send_heartbeat(&self, nonce: impl Into<String>) -> Result<()> {
        self.send(ServerFrame::Heartbeat(HeartbeatFrame { nonce: nonce.into() }))
            .await
    }

    async fn send(&self, frame: ServerFrame) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        let kind = frame.kind();
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(BridgeError::Closed),
            result = async {
                let mut sink = self.sink.lock().await;
                sink.send(&frame).await
            } => {
                if result.is_ok() {
                    counter!(FRAMES_SENT_TOTAL, "side" => "server", "kind" => kind).increment(1);
                }
                result
            }
        }
    }

    /// Terminal state of the stream: `Err(Closed)` once it ended or was
    /// cancelled, `Ok(())` while live. Does not close the transport.
    pub fn close(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }

    /// Whether the stream has ended.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stream has ended.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }

    pub(crate) async fn close_transport(&self, status: CloseStatus) {
        self.token.cancel();
        let mut sink = self.sink.lock().await;
        // The peer may already be gone.
        let _ = sink.close(Some(status)).await;
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("id", &self.id)
            .field("node_id", &self.meta.node_id)
            .field("namespace", &self.meta.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{self, MemoryPeer};
    use transport_core::Message;

    fn session() -> (BridgeSession, MemoryPeer<ServerFrame>, CancellationToken) {
        let (sink, peer) = memory::channel(8);
        let token = CancellationToken::new();
        let meta = RegisterMeta {
            node_id: "n1".into(),
            namespace: "chat".into(),
            ..RegisterMeta::default()
        };
        (BridgeSession::new(meta, Box::new(sink), token.clone()), peer, token)
    }

    #[tokio::test]
    async fn deliver_is_normalized() {
        let (session, mut peer, _token) = session();
        session
            .send_deliver(TransportEnvelope::new(Message::text("chat.reply", "hi")))
            .await
            .unwrap();
        let Some(ServerFrame::Deliver(frame)) = peer.frames.recv().await else {
            panic!("expected deliver");
        };
        let message = frame.envelope.message.unwrap();
        assert!(!message.request_id.is_empty());
        assert!(message.timestamp.is_some());
        assert!(!frame.envelope.envelope_version.is_empty());
    }

    #[tokio::test]
    async fn broadcast_and_heartbeat_kinds() {
        let (session, mut peer, _token) = session();
        session
            .send_broadcast(TransportEnvelope::new(Message::text("chat.all", "x")))
            .await
            .unwrap();
        session.send_heartbeat("42").await.unwrap();
        assert_eq!(peer.frames.recv().await.unwrap().kind(), "broadcast");
        assert_eq!(
            peer.frames.recv().await,
            Some(ServerFrame::Heartbeat(HeartbeatFrame { nonce: "42".into() }))
        );
    }

    #[tokio::test]
    async fn close_reports_terminal_state() {
        let (session, _peer, token) = session();
        assert_eq!(session.close(), Ok(()));
        token.cancel();
        assert_eq!(session.close(), Err(BridgeError::Closed));
        assert!(session.is_closed());
        assert_eq!(session.send_heartbeat("1").await, Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn close_transport_reports_status() {
        let (session, peer, _token) = session();
        session.close_transport(CloseStatus::going_away()).await;
        assert!(session.is_closed());
        assert_eq!(peer.close_status(), Some(CloseStatus::going_away()));
    }

    #[test]
    fn register_meta_from_frame() {
        let meta = RegisterMeta::from_frame(
            RegisterFrame {
                node_id: "n".into(),
                namespace: "ns".into(),
                supported_versions: vec!["v1".into()],
                bridge_version: "v1".into(),
            },
            StreamMetadata::new(),
            Some("abc".into()),
            None,
        );
        assert_eq!(meta.node_id, "n");
        assert_eq!(meta.supported_versions, vec!["v1".to_owned()]);
        assert_eq!(meta.trace_id.as_deref(), Some("abc"));
    }
}
