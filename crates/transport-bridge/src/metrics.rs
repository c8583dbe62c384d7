//! Prometheus recorder and bridge metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::{BridgeError, Result};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle the server renders `/metrics` from. Fails if another
/// recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| BridgeError::Config(format!("install metrics recorder: {e}")))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared by client and server.

/// Sessions registered total (counter, labels: namespace).
pub const SESSIONS_TOTAL: &str = "bridge_sessions_total";
/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "bridge_sessions_active";
/// Session lifetime seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "bridge_session_duration_seconds";
/// Streams rejected before or at registration (counter, labels: reason).
pub const REGISTRATION_FAILURES_TOTAL: &str = "bridge_registration_failures_total";
/// Upgrades refused by the authenticator (counter).
pub const AUTH_REJECTIONS_TOTAL: &str = "bridge_auth_rejections_total";
/// Frames read from a stream (counter, labels: side, kind).
pub const FRAMES_RECEIVED_TOTAL: &str = "bridge_frames_received_total";
/// Frames written to a stream (counter, labels: side, kind).
pub const FRAMES_SENT_TOTAL: &str = "bridge_frames_sent_total";
/// Client reconnect attempts after a failure or disconnect (counter).
pub const RECONNECTS_TOTAL: &str = "bridge_reconnects_total";
/// Failed `publish_ingress` calls (counter).
pub const PUBLISH_ERRORS_TOTAL: &str = "bridge_publish_errors_total";
/// Client has a registered stream (gauge, 1 or 0).
pub const CLIENT_CONNECTED: &str = "bridge_client_connected";
