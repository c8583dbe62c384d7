//! `transport worker`: bridge server with an echo handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use transport_auth::{InMemoryVersionStore, TokenAuthenticator, TokenConfig, TokenVersionStore, issue_token};
use transport_bridge::{
    BridgeError, BridgeHandler, BridgeOptions, BridgeServer, BridgeSession, RegisterMeta, SessionRegistry,
};
use transport_core::TransportEnvelope;
use transport_settings::TransportSettings;

/// Action that is fanned out to every session instead of echoed.
pub const BROADCAST_ACTION: &str = "chat.broadcast";

/// Echoes ingress to its sender, fans out [`BROADCAST_ACTION`], and answers
/// heartbeats.
pub struct EchoHandler {
    registry: Arc<SessionRegistry>,
}

impl EchoHandler {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BridgeHandler for EchoHandler {
    async fn on_register(&self, session: &Arc<BridgeSession>, meta: &RegisterMeta) -> transport_bridge::Result<()> {
        info!(
            session_id = session.id(),
            node_id = %meta.node_id,
            namespace = %meta.namespace,
            subject = meta.principal.as_ref().map_or("", |p| p.subject.as_str()),
            "node registered"
        );
        Ok(())
    }

    async fn on_ingress(
        &self,
        session: &Arc<BridgeSession>,
        envelope: TransportEnvelope,
    ) -> transport_bridge::Result<()> {
        let action = envelope.message.as_ref().map_or("", |m| m.action.as_str());
        if action == BROADCAST_ACTION {
            let delivered = self.registry.broadcast(&envelope).await;
            debug!(delivered, "fanned out broadcast");
            return Ok(());
        }
        session.send_deliver(envelope).await
    }

    async fn on_heartbeat(&self, session: &Arc<BridgeSession>, nonce: String) -> transport_bridge::Result<()> {
        session.send_heartbeat(nonce).await
    }

    async fn on_close(&self, session: &Arc<BridgeSession>, reason: Option<&BridgeError>) {
        info!(
            session_id = session.id(),
            age_secs = session.age().as_secs(),
            reason = ?reason,
            "node disconnected"
        );
    }
}

/// Map settings onto server options. `listen` overrides the configured
/// address.
pub fn server_options(settings: &TransportSettings, listen: Option<String>) -> BridgeOptions {
    let s = &settings.bridge_server;
    BridgeOptions {
        namespace: s.namespace.clone(),
        insecure: s.insecure,
        tls_cert: non_empty_path(&s.tls_cert_file),
        tls_key: non_empty_path(&s.tls_key_file),
        heartbeat_interval: std::time::Duration::from_secs(s.heartbeat_interval_seconds),
        graceful_shutdown_timeout: s.graceful_shutdown_timeout(),
        ..BridgeOptions::new(listen.unwrap_or_else(|| s.listen_addr.clone()))
    }
}

pub(crate) fn non_empty_path(path: &str) -> Option<PathBuf> {
    (!path.is_empty()).then(|| PathBuf::from(path))
}

fn token_config(settings: &TransportSettings) -> TokenConfig {
    TokenConfig {
        secret: settings.auth.secret_key.clone(),
        ttl: settings.auth.access_token_ttl(),
        clock_skew: settings.auth.clock_skew(),
    }
}

/// Run the worker until Ctrl-C.
pub async fn run(
    settings: &TransportSettings,
    listen: Option<String>,
    issue_for: Option<&str>,
    metrics: Option<PrometheusHandle>,
) -> Result<()> {
    let mut server = BridgeServer::new(server_options(settings, listen)).context("Invalid worker options")?;

    let store: Arc<dyn TokenVersionStore> = Arc::new(InMemoryVersionStore::new());
    let config = token_config(settings);
    if let Some(subject) = issue_for {
        let issued = issue_token(&config, store.as_ref(), subject, "cli")
            .await
            .context("Failed to issue token")?;
        println!(
            "{}",
            serde_json::json!({
                "subject": subject,
                "token": issued.token,
                "expires_at": issued.expires_at,
                "version": issued.version,
            })
        );
    }
    if settings.auth.required {
        server = server.with_authenticator(Arc::new(TokenAuthenticator::new(config, store)));
    }
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let handler = Arc::new(EchoHandler::new(Arc::clone(server.sessions())));
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping worker");
        }
        signal.cancel();
    });

    server.serve(handler, &cancel).await.context("Worker failed")
}
