//! `transport sidecar`: relays stdin lines to a worker and prints what comes
//! back as JSON lines.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transport_bridge::{BridgeClient, BridgeOptions, Subscription};
use transport_core::{Message, TransportEnvelope};
use transport_settings::TransportSettings;

use crate::worker::non_empty_path;

/// How long Ctrl-C waits for the client's tasks to stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Map settings onto client options. `address` overrides the configured one.
pub fn client_options(settings: &TransportSettings, address: Option<String>) -> BridgeOptions {
    let c = &settings.bridge_client;
    BridgeOptions {
        namespace: c.namespace.clone(),
        node_id: settings.app.node_id.clone(),
        deliver_buffer_size: c.deliver_buffer,
        broadcast_buffer_size: c.broadcast_buffer,
        dial_timeout: c.dial_timeout(),
        heartbeat_interval: c.heartbeat_interval(),
        reconnect_backoff_base: c.reconnect_base(),
        reconnect_backoff_max: c.reconnect_max(),
        tls_cert: non_empty_path(&c.tls_cert_file),
        tls_key: non_empty_path(&c.tls_key_file),
        insecure: c.insecure,
        metadata_headers: c.headers.clone(),
        enable_backpressure: c.enable_backpressure,
        max_in_flight_deliver: c.max_inflight_deliver,
        ..BridgeOptions::new(address.unwrap_or_else(|| c.address.clone()))
    }
}

/// One printed line for an inbound envelope.
fn render(kind: &str, envelope: &TransportEnvelope) -> Result<String> {
    Ok(serde_json::to_string(&json!({ "kind": kind, "envelope": envelope }))?)
}

/// Print every envelope from `subscription` and acknowledge it.
async fn print_and_ack(client: BridgeClient, subscription: Subscription, kind: &'static str, ack_timeout: Duration) {
    while let Some(envelope) = subscription.recv().await {
        match render(kind, &envelope) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to render envelope"),
        }
        let delivery = client.delivery(envelope);
        match tokio::time::timeout(ack_timeout, delivery.ack()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(kind, error = %e, "ack failed"),
            Err(_) => warn!(kind, "ack timed out"),
        }
    }
}

/// Run the sidecar until stdin closes or Ctrl-C.
pub async fn run(settings: &TransportSettings, address: Option<String>, action: &str) -> Result<()> {
    let client = BridgeClient::new(client_options(settings, address)).context("Invalid sidecar options")?;
    let ack_timeout = settings.bridge_client.pending_ack_timeout();

    let printers = [
        tokio::spawn(print_and_ack(client.clone(), client.subscribe_deliver(), "deliver", ack_timeout)),
        tokio::spawn(print_and_ack(client.clone(), client.subscribe_broadcast(), "broadcast", ack_timeout)),
    ];

    let cancel = CancellationToken::new();
    client.start(&cancel).context("Failed to start bridge client")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, draining sidecar");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            info!("stdin closed, draining sidecar");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let envelope = TransportEnvelope::new(Message::text(action, line));
        if let Err(e) = client.publish_ingress(&cancel, envelope).await {
            warn!(error = %e, "publish failed");
        }
    }

    cancel.cancel();
    let drained = client.drain(DRAIN_TIMEOUT).await;
    for printer in printers {
        let _ = printer.await;
    }
    drained.context("Sidecar did not drain cleanly")
}
