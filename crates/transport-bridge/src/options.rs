//! Bridge client and server options.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use transport_core::PROTOCOL_VERSION;

use crate::errors::{BridgeError, Result};

/// HTTP path of the bridge stream endpoint.
pub const STREAM_PATH: &str = "/bridge/v1/stream";

/// Default capacity of each subscription channel.
pub const DEFAULT_BUFFER_SIZE: usize = 128;
/// Default bound on dial + TLS + upgrade.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default client heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Default first reconnect delay.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
/// Default reconnect delay cap.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(15);
/// Default time live sessions get to finish during a graceful stop.
pub const DEFAULT_GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(30);

/// Options shared by [`BridgeClient`](crate::BridgeClient) and
/// [`BridgeServer`](crate::BridgeServer).
///
/// Clients dial `address`; servers listen on it. Zero-valued durations and
/// buffer sizes are replaced by defaults during validation.
#[derive(Clone, Debug)]
pub struct BridgeOptions {
    /// `host:port` or a `ws://` / `wss://` URL.
    pub address: String,
    /// Routing namespace (required for clients).
    pub namespace: String,
    /// Node id announced at registration (required for clients).
    pub node_id: String,
    /// Capacity of the deliver subscription channel.
    pub deliver_buffer_size: usize,
    /// Capacity of the broadcast subscription channel.
    pub broadcast_buffer_size: usize,
    /// Bound on dialing a single connection.
    pub dial_timeout: Duration,
    /// Client heartbeat period.
    pub heartbeat_interval: Duration,
    /// First reconnect delay.
    pub reconnect_backoff_base: Duration,
    /// Reconnect delay cap.
    pub reconnect_backoff_max: Duration,
    /// PEM certificate chain (server identity, or client identity when dialing).
    pub tls_cert: Option<PathBuf>,
    /// PEM private key matching `tls_cert`.
    pub tls_key: Option<PathBuf>,
    /// Plaintext WebSocket instead of TLS.
    pub insecure: bool,
    /// Extra headers sent with the upgrade request.
    pub metadata_headers: HashMap<String, String>,
    /// Envelope versions announced at registration.
    pub supported_versions: Vec<String>,
    /// Bridge protocol version announced at registration.
    pub bridge_version: String,
    /// Bound concurrent `publish_ingress` calls.
    pub enable_backpressure: bool,
    /// Slot count when backpressure is enabled.
    pub max_in_flight_deliver: usize,
    /// Time live sessions get to finish during a graceful stop.
    pub graceful_shutdown_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            address: String::new(),
            namespace: String::new(),
            node_id: String::new(),
            deliver_buffer_size: DEFAULT_BUFFER_SIZE,
            broadcast_buffer_size: DEFAULT_BUFFER_SIZE,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_backoff_base: DEFAULT_RECONNECT_BASE,
            reconnect_backoff_max: DEFAULT_RECONNECT_MAX,
            tls_cert: None,
            tls_key: None,
            insecure: false,
            metadata_headers: HashMap::new(),
            supported_versions: vec![PROTOCOL_VERSION.to_owned()],
            bridge_version: PROTOCOL_VERSION.to_owned(),
            enable_backpressure: false,
            max_in_flight_deliver: 0,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN,
        }
    }
}

impl BridgeOptions {
    /// Options for `address` with every other field at its default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validate for dialing and fill defaults.
    pub fn normalized_for_client(mut self) -> Result<Self> {
        self.address = self.address.trim().to_owned();
        if self.address.is_empty() {
            return Err(BridgeError::Config("address is required".into()));
        }
        if self.node_id.trim().is_empty() {
            return Err(BridgeError::Config("node_id is required".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(BridgeError::Config("namespace is required".into()));
        }
        self.fill_defaults();
        Ok(self)
    }

    /// Validate for listening and fill defaults.
    pub fn normalized_for_server(mut self) -> Result<Self> {
        self.address = self.address.trim().to_owned();
        if self.address.is_empty() {
            return Err(BridgeError::Config("address is required".into()));
        }
        if !self.insecure && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(BridgeError::Config(
                "tls_cert and tls_key are required unless insecure".into(),
            ));
        }
        self.fill_defaults();
        Ok(self)
    }

    fn fill_defaults(&mut self) {
        if self.deliver_buffer_size == 0 {
            self.deliver_buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.broadcast_buffer_size == 0 {
            self.broadcast_buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if self.reconnect_backoff_base.is_zero() {
            self.reconnect_backoff_base = DEFAULT_RECONNECT_BASE;
        }
        if self.reconnect_backoff_max.is_zero() {
            self.reconnect_backoff_max = DEFAULT_RECONNECT_MAX;
        }
        if self.graceful_shutdown_timeout.is_zero() {
            self.graceful_shutdown_timeout = DEFAULT_GRACEFUL_SHUTDOWN;
        }
        if self.supported_versions.is_empty() {
            self.supported_versions.push(PROTOCOL_VERSION.to_owned());
        }
        if self.bridge_version.is_empty() {
            self.bridge_version = PROTOCOL_VERSION.to_owned();
        }
    }

    /// Slot count for `publish_ingress`, or `None` when unbounded.
    pub fn backpressure_limit(&self) -> Option<usize> {
        (self.enable_backpressure && self.max_in_flight_deliver > 0)
            .then_some(self.max_in_flight_deliver)
    }

    /// WebSocket URL the client dials.
    ///
    /// An explicit `ws://` / `wss://` scheme is kept; [`STREAM_PATH`] is
    /// appended when the URL has no path.
    pub fn stream_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        for scheme in ["ws://", "wss://"] {
            if let Some(rest) = address.strip_prefix(scheme) {
                return if rest.contains('/') {
                    address.to_owned()
                } else {
                    format!("{address}{STREAM_PATH}")
                };
            }
        }
        let scheme = if self.insecure { "ws" } else { "wss" };
        format!("{scheme}://{address}{STREAM_PATH}")
    }
}
