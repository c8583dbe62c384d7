//! # transport-core
//!
//! Shared vocabulary for the transport crates:
//!
//! - **Envelope**: [`envelope::TransportEnvelope`] and [`envelope::Message`], the
//!   routed unit of application data, with idempotent normalization helpers
//! - **Error codes**: [`codes::ErrorCode`] values shared across services
//! - **Hooks**: [`hooks::Authenticator`], the out-of-band verification seam
//!   invoked before a bridge stream is accepted
//! - **Trace metadata**: [`trace`] helpers for carrying trace ids in stream
//!   metadata
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod codes;
pub mod envelope;
pub mod hooks;
pub mod logging;
pub mod trace;

pub use envelope::{
    EnvelopeError, Message, Payload, PROTOCOL_VERSION, TransportEnvelope, normalize_envelope,
    normalize_message, validate_ingress,
};
pub use hooks::{AuthRejection, Authenticator, Principal, StreamMetadata};
