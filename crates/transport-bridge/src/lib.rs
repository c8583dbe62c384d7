//! # transport-bridge
//!
//! A long-lived bidirectional stream between a sidecar (client) and a worker
//! (server), carried as JSON frames over one WebSocket.
//!
//! - **Client**: [`BridgeClient`] registers, publishes ingress and acks, and
//!   routes deliveries and broadcasts into bounded [`Subscription`]s. The
//!   stream is redialed with exponential backoff; nothing is replayed.
//! - **Server**: [`BridgeServer`] accepts streams on [`options::STREAM_PATH`],
//!   gates them on a Register frame, and drives a [`BridgeHandler`] per
//!   [`BridgeSession`].
//! - **Frames**: [`frame::ClientFrame`] and [`frame::ServerFrame`], encoded by
//!   [`codec`].
//! - **Transport**: [`transport::Dialer`] and [`transport::FrameSink`] seams,
//!   with WebSocket (rustls) and in-memory implementations.

#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod codec;
pub mod delivery;
pub mod dispatch;
pub mod errors;
pub mod frame;
pub mod handler;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use client::{BridgeClient, ConnectionState, Subscription};
pub use delivery::Delivery;
pub use errors::{BridgeError, Result};
pub use frame::{Ack, ClientFrame, RegisterFrame, ServerFrame};
pub use handler::BridgeHandler;
pub use options::BridgeOptions;
pub use registry::SessionRegistry;
pub use server::BridgeServer;
pub use session::{BridgeSession, RegisterMeta};
