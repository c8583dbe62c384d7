//! Envelope schema and normalization.
//!
//! A [`TransportEnvelope`] is the routed unit of application data carried by
//! every Ingress, Deliver, and Broadcast frame. Producers build an envelope
//! just before sending; [`normalize_envelope`] then fills the defaults
//! (request id, timestamps, version tags) in place. Normalization only writes
//! fields that are still empty, so running it again downstream is a no-op.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::codes::ErrorCode;

/// Protocol version stamped on messages and envelopes that carry none.
pub const PROTOCOL_VERSION: &str = "2025-01";

/// Attribute key mirroring [`TransportEnvelope::trace_id`].
pub const TRACE_ID_ATTRIBUTE: &str = "trace_id";

/// Attribute key carrying the broadcast id of a fan-out envelope.
pub const BROADCAST_ID_ATTRIBUTE: &str = "broadcast_id";

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Plain text chat payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPayload {
    /// UTF-8 message text.
    pub text: String,
}

/// Audio chat payload. `data` travels base64-encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    /// Raw audio bytes.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Container or codec name (`"pcm"`, `"opus"`, ...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    /// Sample rate in Hz, `0` when unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sample_rate: u32,
}

/// Structured error payload sent back to the edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric code (see [`crate::codes`]).
    pub code: i32,
    /// Symbolic code, e.g. `"TOKEN_INVALID"`.
    pub symbol: String,
    /// Human-readable message.
    pub message: String,
}

impl From<ErrorCode> for ErrorPayload {
    fn from(code: ErrorCode) -> Self {
        Self {
            code: code.numeric,
            symbol: code.symbol.to_owned(),
            message: code.message.to_owned(),
        }
    }
}

/// Message body variants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Text message.
    Text(TextPayload),
    /// Audio message.
    Audio(AudioPayload),
    /// Error report.
    Error(ErrorPayload),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message / Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Application message carried inside an envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    /// Message schema version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Unique request id; doubles as the acknowledgement message id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// `"request"`, `"response"`, `"event"`, or empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Business action name, e.g. `"chat.send"`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    /// Originating end user.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// End-user session the message belongs to.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    /// When the message was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Free-form metadata object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Message body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Message {
    /// Build a text request for `action`.
    pub fn text(action: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: "request".into(),
            action: action.into(),
            payload: Some(Payload::Text(TextPayload { text: text.into() })),
            ..Self::default()
        }
    }

    /// Build an audio request for `action`.
    pub fn audio(action: impl Into<String>, audio: AudioPayload) -> Self {
        Self {
            kind: "request".into(),
            action: action.into(),
            payload: Some(Payload::Audio(audio)),
            ..Self::default()
        }
    }

    /// The text body, if this is a text message.
    pub fn text_body(&self) -> Option<&str> {
        match &self.payload {
            Some(Payload::Text(t)) => Some(&t.text),
            _ => None,
        }
    }
}

/// Routed unit of application data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportEnvelope {
    /// Application message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Free-form routing attributes.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// When the envelope was first normalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Envelope schema version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub envelope_version: String,
    /// Distributed trace id.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    /// Routing slot.
    #[serde(skip_serializing_if = "is_zero")]
    pub slot_id: u32,
    /// Generation of the slot lease the sender held.
    #[serde(skip_serializing_if = "is_zero")]
    pub slot_generation: u32,
    /// Tenant / product namespace.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Explicit target ids (users, rooms, nodes).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<String>,
}

impl TransportEnvelope {
    /// Wrap a message.
    pub fn new(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    /// Request id of the wrapped message, empty when absent.
    pub fn message_id(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.request_id.as_str())
    }

    /// Broadcast id attribute, empty when absent.
    pub fn broadcast_id(&self) -> &str {
        self.attributes
            .get(BROADCAST_ID_ATTRIBUTE)
            .map_or("", String::as_str)
    }

    /// Validate this envelope as client-originated ingress.
    pub fn validate_ingress(&self) -> Result<(), EnvelopeError> {
        match &self.message {
            Some(msg) => validate_ingress(msg),
            None => Err(EnvelopeError::MissingMessage),
        }
    }

    /// Set the trace id and mirror it into the attributes.
    ///
    /// A blank trace id leaves the envelope untouched.
    pub fn stamp_trace(&mut self, trace_id: &str) {
        if trace_id.trim().is_empty() {
            return;
        }
        trace_id.clone_into(&mut self.trace_id);
        let _ = self
            .attributes
            .insert(TRACE_ID_ATTRIBUTE.to_owned(), trace_id.to_owned());
    }

    /// Record the routing slot held by the sender.
    pub fn set_slot(&mut self, slot_id: u32, generation: u32) {
        self.slot_id = slot_id;
        self.slot_generation = generation;
    }

    /// `(slot_id, slot_generation)`.
    pub fn slot(&self) -> (u32, u32) {
        (self.slot_id, self.slot_generation)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalization / validation
// ─────────────────────────────────────────────────────────────────────────────

/// Ingress validation failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The envelope carries no message.
    #[error("message is missing")]
    MissingMessage,
    /// Edge clients may only send requests.
    #[error("only request kind allowed, got {0:?}")]
    InvalidKind(String),
    /// The action name is blank.
    #[error("action is required")]
    MissingAction,
    /// Neither a text nor an audio payload is present.
    #[error("payload is required")]
    MissingPayload,
}

/// Fill message defaults that are still empty.
pub fn normalize_message(msg: &mut Message) {
    if msg.version.is_empty() {
        PROTOCOL_VERSION.clone_into(&mut msg.version);
    }
    if msg.request_id.is_empty() {
        msg.request_id = Uuid::new_v4().to_string();
    }
    if msg.metadata.is_none() {
        msg.metadata = Some(Map::new());
    }
    if msg.timestamp.is_none() {
        msg.timestamp = Some(Utc::now());
    }
}

/// Fill envelope (and nested message) defaults that are still empty.
pub fn normalize_envelope(env: &mut TransportEnvelope) {
    if let Some(msg) = env.message.as_mut() {
        normalize_message(msg);
    }
    if env.created_at.is_none() {
        env.created_at = Some(Utc::now());
    }
    if env.envelope_version.is_empty() {
        PROTOCOL_VERSION.clone_into(&mut env.envelope_version);
    }
}

/// Validate a client-originated message.
pub fn validate_ingress(msg: &Message) -> Result<(), EnvelopeError> {
    if !msg.kind.is_empty() && msg.kind != "request" {
        return Err(EnvelopeError::InvalidKind(msg.kind.clone()));
    }
    if msg.action.trim().is_empty() {
        return Err(EnvelopeError::MissingAction);
    }
    match msg.payload {
        Some(Payload::Text(_) | Payload::Audio(_)) => Ok(()),
        _ => Err(EnvelopeError::MissingPayload),
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u32) -> bool {
    *v == 0
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn normalize_fills_defaults() {
        let mut env = TransportEnvelope::new(Message::text("chat.send", "hi"));
        normalize_envelope(&mut env);

        let msg = env.message.as_ref().unwrap();
        assert_eq!(msg.version, PROTOCOL_VERSION);
        assert!(!msg.request_id.is_empty());
        assert!(msg.timestamp.is_some());
        assert_eq!(msg.metadata, Some(Map::new()));
        assert!(env.created_at.is_some());
        assert_eq!(env.envelope_version, PROTOCOL_VERSION);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut env = TransportEnvelope::new(Message::text("chat.send", "hi"));
        normalize_envelope(&mut env);
        let first = env.clone();
        normalize_envelope(&mut env);
        assert_eq!(env, first);
    }

    #[test]
    fn normalize_preserves_existing_values() {
        let mut msg = Message::text("chat.send", "hi");
        msg.version = "2024-06".into();
        msg.request_id = "req-1".into();
        let mut env = TransportEnvelope::new(msg);
        env.envelope_version = "2024-06".into();
        normalize_envelope(&mut env);

        assert_eq!(env.message_id(), "req-1");
        assert_eq!(env.message.as_ref().unwrap().version, "2024-06");
        assert_eq!(env.envelope_version, "2024-06");
    }

    #[test]
    fn normalize_without_message_sets_envelope_fields() {
        let mut env = TransportEnvelope::default();
        normalize_envelope(&mut env);
        assert!(env.message.is_none());
        assert_eq!(env.envelope_version, PROTOCOL_VERSION);
    }

    #[test]
    fn validate_accepts_text_and_audio_requests() {
        assert!(validate_ingress(&Message::text("chat.send", "hi")).is_ok());
        let audio = AudioPayload {
            data: vec![1, 2, 3],
            format: "pcm".into(),
            sample_rate: 16_000,
        };
        assert!(validate_ingress(&Message::audio("chat.voice", audio)).is_ok());

        let mut empty_kind = Message::text("chat.send", "hi");
        empty_kind.kind.clear();
        assert!(validate_ingress(&empty_kind).is_ok());
    }

    #[test]
    fn validate_rejects_bad_messages() {
        let mut msg = Message::text("chat.send", "hi");
        msg.kind = "response".into();
        assert_matches!(validate_ingress(&msg), Err(EnvelopeError::InvalidKind(k)) if k == "response");

        let msg = Message::text("   ", "hi");
        assert_eq!(validate_ingress(&msg), Err(EnvelopeError::MissingAction));

        let mut msg = Message::text("chat.send", "hi");
        msg.payload = Some(Payload::Error(codes::INTERNAL.into()));
        assert_eq!(validate_ingress(&msg), Err(EnvelopeError::MissingPayload));

        msg.payload = None;
        assert_eq!(validate_ingress(&msg), Err(EnvelopeError::MissingPayload));

        assert_eq!(
            TransportEnvelope::default().validate_ingress(),
            Err(EnvelopeError::MissingMessage)
        );
    }

    #[test]
    fn stamp_trace_sets_field_and_attribute() {
        let mut env = TransportEnvelope::default();
        env.stamp_trace("abc123");
        assert_eq!(env.trace_id, "abc123");
        assert_eq!(env.attributes.get(TRACE_ID_ATTRIBUTE).unwrap(), "abc123");
    }

    #[test]
    fn stamp_trace_blank_is_noop() {
        let mut env = TransportEnvelope::default();
        env.stamp_trace("  ");
        assert!(env.trace_id.is_empty());
        assert!(env.attributes.is_empty());
    }

    #[test]
    fn slot_round_trips() {
        let mut env = TransportEnvelope::default();
        assert_eq!(env.slot(), (0, 0));
        env.set_slot(42, 7);
        assert_eq!(env.slot(), (42, 7));
    }

    #[test]
    fn broadcast_id_reads_attribute() {
        let mut env = TransportEnvelope::default();
        assert_eq!(env.broadcast_id(), "");
        let _ = env
            .attributes
            .insert(BROADCAST_ID_ATTRIBUTE.into(), "b-9".into());
        assert_eq!(env.broadcast_id(), "b-9");
    }

    #[test]
    fn wire_shape_is_compact() {
        let env = TransportEnvelope::new(Message::text("chat.send", "hello"));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "message": {
                    "kind": "request",
                    "action": "chat.send",
                    "payload": {"type": "text", "text": "hello"}
                }
            })
        );
    }

    #[test]
    fn audio_data_is_base64_on_the_wire() {
        let audio = AudioPayload {
            data: b"abc".to_vec(),
            format: "pcm".into(),
            sample_rate: 8000,
        };
        let value = serde_json::to_value(Payload::Audio(audio.clone())).unwrap();
        assert_eq!(value["data"], "YWJj");
        assert_eq!(value["type"], "audio");

        let back: Payload = serde_json::from_value(value).unwrap();
        assert_eq!(back, Payload::Audio(audio));
    }

    #[test]
    fn unknown_fields_default() {
        let env: TransportEnvelope = serde_json::from_str(r#"{"slot_id":3}"#).unwrap();
        assert_eq!(env.slot_id, 3);
        assert!(env.message.is_none());
        assert!(env.namespace.is_empty());
    }

    #[test]
    fn text_body_accessor() {
        assert_eq!(Message::text("a", "b").text_body(), Some("b"));
        assert_eq!(Message::default().text_body(), None);
    }
}
