//! Wire frames.
//!
//! Every WebSocket text message carries exactly one frame, tagged by `type`:
//!
//! ```text
//! client → server: register | ingress | ack | heartbeat
//! server → client: deliver | broadcast | heartbeat
//! ```

use serde::{Deserialize, Serialize};
use transport_core::TransportEnvelope;

/// Handshake announcing a node. Must be the first frame on a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFrame {
    /// Sender node id.
    pub node_id: String,
    /// Routing namespace the node serves.
    pub namespace: String,
    /// Envelope versions the node understands.
    #[serde(default)]
    pub supported_versions: Vec<String>,
    /// Bridge protocol version the node speaks.
    #[serde(default)]
    pub bridge_version: String,
}

/// Envelope-carrying frame body (ingress, deliver, broadcast).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeFrame {
    /// The routed envelope.
    pub envelope: TransportEnvelope,
}

/// Acknowledgement of a prior Deliver or Broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Request id of the acknowledged message.
    pub message_id: String,
    /// Broadcast id, when acknowledging a fan-out.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub broadcast_id: String,
    /// `ok` or an application status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl Ack {
    /// Status used for successful acknowledgements.
    pub const STATUS_OK: &'static str = "ok";

    /// A successful acknowledgement.
    pub fn ok(message_id: impl Into<String>, broadcast_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            broadcast_id: broadcast_id.into(),
            status: Self::STATUS_OK.to_owned(),
            reason: String::new(),
        }
    }
}

/// Liveness probe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    /// Opaque nonce.
    #[serde(default)]
    pub nonce: String,
}

/// Frames sent by the client (sidecar).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake.
    Register(RegisterFrame),
    /// Application message for the worker.
    Ingress(EnvelopeFrame),
    /// Acknowledgement.
    Ack(Ack),
    /// Liveness probe.
    Heartbeat(HeartbeatFrame),
}

impl ClientFrame {
    /// Frame type name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Ingress(_) => "ingress",
            Self::Ack(_) => "ack",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Frames sent by the server (worker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Unicast message.
    Deliver(EnvelopeFrame),
    /// Fan-out message.
    Broadcast(EnvelopeFrame),
    /// Liveness probe or reply.
    Heartbeat(HeartbeatFrame),
}

impl ServerFrame {
    /// Frame type name, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deliver(_) => "deliver",
            Self::Broadcast(_) => "broadcast",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}
