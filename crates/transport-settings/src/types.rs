//! Settings types with compiled defaults.
//!
//! All durations are whole seconds on disk; accessor methods return
//! [`Duration`]s.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use transport_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Process-level settings.
    pub app: AppSettings,
    /// Logging settings.
    pub log: LogSettings,
    /// Sidecar-side bridge connection.
    pub bridge_client: BridgeClientSettings,
    /// Worker-side bridge listener.
    pub bridge_server: BridgeServerSettings,
    /// Bearer token verification.
    pub auth: AuthSettings,
}

impl TransportSettings {
    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        let c = &self.bridge_client;
        if c.reconnect_base_seconds == 0 || c.reconnect_max_seconds == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge_client reconnect backoff must be positive".into(),
            ));
        }
        if c.reconnect_base_seconds > c.reconnect_max_seconds {
            return Err(SettingsError::InvalidValue(format!(
                "bridge_client reconnect_base_seconds ({}) exceeds reconnect_max_seconds ({})",
                c.reconnect_base_seconds, c.reconnect_max_seconds
            )));
        }
        if c.heartbeat_interval_seconds == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge_client heartbeat_interval_seconds must be positive".into(),
            ));
        }
        if c.enable_backpressure && c.max_inflight_deliver == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge_client enable_backpressure requires max_inflight_deliver > 0".into(),
            ));
        }
        if self.auth.required && self.auth.secret_key.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.required is set but auth.secret_key is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Process-level settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Deployment environment (`dev`, `staging`, `prod`, ...).
    pub env: String,
    /// Node identity announced on registration.
    pub node_id: String,
    /// Bind address of the Prometheus endpoint; empty disables it.
    pub metrics_addr: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            node_id: String::new(),
            metrics_addr: String::new(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `text` or `json`.
    pub format: LogFormat,
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Include file and line in each event.
    pub report_caller: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
            report_caller: false,
        }
    }
}

/// Sidecar-side bridge connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeClientSettings {
    /// Server address (`host:port`, `ws://...` or `wss://...`).
    pub address: String,
    /// Logical routing namespace.
    pub namespace: String,
    /// Use plaintext instead of TLS.
    pub insecure: bool,
    /// Client certificate (PEM) for mutual TLS.
    pub tls_cert_file: String,
    /// Client private key (PEM) for mutual TLS.
    pub tls_key_file: String,
    /// Extra upgrade request headers.
    pub headers: HashMap<String, String>,
    /// Dial timeout.
    pub dial_timeout_seconds: u64,
    /// Heartbeat period.
    pub heartbeat_interval_seconds: u64,
    /// First reconnect delay.
    pub reconnect_base_seconds: u64,
    /// Reconnect delay cap.
    pub reconnect_max_seconds: u64,
    /// Bound concurrent publishes.
    pub enable_backpressure: bool,
    /// Publish concurrency bound when backpressure is enabled.
    pub max_inflight_deliver: usize,
    /// Time a delivery may stay unacknowledged.
    pub pending_ack_timeout_seconds: u64,
    /// Deliver subscription capacity.
    pub deliver_buffer: usize,
    /// Broadcast subscription capacity.
    pub broadcast_buffer: usize,
}

impl Default for BridgeClientSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7070".to_string(),
            namespace: "default".to_string(),
            insecure: false,
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
            headers: HashMap::new(),
            dial_timeout_seconds: 5,
            heartbeat_interval_seconds: 15,
            reconnect_base_seconds: 1,
            reconnect_max_seconds: 15,
            enable_backpressure: false,
            max_inflight_deliver: 0,
            pending_ack_timeout_seconds: 15,
            deliver_buffer: 128,
            broadcast_buffer: 128,
        }
    }
}

impl BridgeClientSettings {
    /// Dial timeout as a [`Duration`].
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_seconds)
    }

    /// Heartbeat period as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// First reconnect delay as a [`Duration`].
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_seconds)
    }

    /// Reconnect delay cap as a [`Duration`].
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_seconds)
    }

    /// Pending ack timeout as a [`Duration`].
    pub fn pending_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_ack_timeout_seconds)
    }
}

/// Worker-side bridge listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeServerSettings {
    /// Bind address.
    pub listen_addr: String,
    /// Namespace this worker serves.
    pub namespace: String,
    /// Serve plaintext instead of TLS.
    pub insecure: bool,
    /// Server certificate (PEM).
    pub tls_cert_file: String,
    /// Server private key (PEM).
    pub tls_key_file: String,
    /// Heartbeat period expected from clients.
    pub heartbeat_interval_seconds: u64,
    /// Time live sessions get to finish on shutdown.
    pub graceful_shutdown_timeout_seconds: u64,
}

impl Default for BridgeServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7070".to_string(),
            namespace: "default".to_string(),
            insecure: false,
            tls_cert_file: String::new(),
            tls_key_file: String::new(),
            heartbeat_interval_seconds: 15,
            graceful_shutdown_timeout_seconds: 30,
        }
    }
}

impl BridgeServerSettings {
    /// Graceful shutdown budget as a [`Duration`].
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_seconds)
    }
}

/// Bearer token settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 signing secret.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    /// Access token lifetime.
    pub access_token_ttl_seconds: u64,
    /// Refresh token lifetime for access/refresh pairs.
    pub refresh_token_ttl_seconds: u64,
    /// Allowed clock skew when checking expiry.
    pub clock_skew_seconds: u64,
    /// Reject streams without a valid token.
    pub required: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            access_token_ttl_seconds: 3600,
            refresh_token_ttl_seconds: 72 * 3600,
            clock_skew_seconds: 30,
            required: false,
        }
    }
}

impl AuthSettings {
    /// Token lifetime as a [`Duration`].
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    /// Refresh token lifetime as a [`Duration`].
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_seconds)
    }

    /// Clock skew as a [`Duration`].
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_seconds)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
