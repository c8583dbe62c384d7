//! # transport
//!
//! Bridge binary. `worker` runs a bridge server with an echo handler;
//! `sidecar` runs a bridge client that relays stdin lines as ingress and
//! prints what the worker sends back.

#![deny(unsafe_code)]

mod sidecar;
mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use transport_core::logging::init_subscriber;
use transport_settings::TransportSettings;

/// Bridge worker and sidecar.
#[derive(Parser, Debug)]
#[command(name = "transport", about = "Bidirectional sidecar/worker bridge")]
struct Cli {
    /// Settings file (defaults to `configs/config_{APP_ENV}.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a bridge server that echoes ingress back to the sender.
    Worker {
        /// Listen address (overrides `bridge_server.listen_addr`).
        #[arg(long)]
        listen: Option<String>,

        /// Print a freshly issued access token for this subject on startup.
        #[arg(long)]
        issue_token: Option<String>,
    },
    /// Run a bridge client relaying stdin to the worker.
    Sidecar {
        /// Worker address or URL (overrides `bridge_client.address`).
        #[arg(long)]
        address: Option<String>,

        /// Action set on each published message.
        #[arg(long, default_value = "sidecar.line")]
        action: String,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<TransportSettings> {
    match path {
        Some(path) => transport_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => transport_settings::load_settings().context("Failed to load settings"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_ref())?;

    init_subscriber(&settings.log.level, settings.log.format, settings.log.report_caller);
    tracing::info!(env = %settings.app.env, "transport starting");

    let metrics = if settings.app.metrics_addr.is_empty() {
        None
    } else {
        Some(transport_bridge::metrics::install_recorder().context("Failed to install metrics recorder")?)
    };

    match cli.command {
        Command::Worker { listen, issue_token } => {
            worker::run(&settings, listen, issue_token.as_deref(), metrics).await
        }
        Command::Sidecar { address, action } => {
            if let Some(handle) = metrics {
                spawn_metrics_endpoint(&settings.app.metrics_addr, handle).await?;
            }
            sidecar::run(&settings, address, &action).await
        }
    }
}

/// Serve `GET /metrics` on `addr` for processes without their own listener.
async fn spawn_metrics_endpoint(addr: &str, handle: PrometheusHandle) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {addr}"))?;
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { transport_bridge::metrics::render(&handle) }
        }),
    );
    tracing::info!(addr, "metrics endpoint listening");
    let _ = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics endpoint failed");
        }
    });
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
