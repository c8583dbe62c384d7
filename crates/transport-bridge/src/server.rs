//! `BridgeServer`: axum WebSocket endpoint feeding [`BridgeHandler`]s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum_server::tls_rustls::RustlsConfig;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use transport_core::envelope::ErrorPayload;
use transport_core::trace::extract_trace_id;
use transport_core::{AuthRejection, Authenticator, StreamMetadata};

use crate::dispatch::{StreamContext, serve_stream};
use crate::errors::{BridgeError, Result};
use crate::frame::{ClientFrame, ServerFrame};
use crate::handler::BridgeHandler;
use crate::health::{self, HealthResponse};
use crate::metrics::AUTH_REJECTIONS_TOTAL;
use crate::options::{BridgeOptions, STREAM_PATH};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::{tls, ws};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    handler: Arc<dyn BridgeHandler>,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    authenticator: Option<Arc<dyn Authenticator>>,
    tracker: TaskTracker,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// Worker-side bridge server.
pub struct BridgeServer {
    options: BridgeOptions,
    registry: Arc<SessionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    authenticator: Option<Arc<dyn Authenticator>>,
    metrics: Option<PrometheusHandle>,
    tracker: TaskTracker,
    start_time: Instant,
}

impl BridgeServer {
    /// Create a server. Fails without an address, or without TLS material
    /// unless `insecure`.
    pub fn new(options: BridgeOptions) -> Result<Self> {
        Ok(Self {
            options: options.normalized_for_server()?,
            registry: Arc::new(SessionRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            authenticator: None,
            metrics: None,
            tracker: TaskTracker::new(),
            start_time: Instant::now(),
        })
    }

    /// Check every upgrade request with `authenticator` before accepting it.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Serve `GET /metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Effective options.
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Registered sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Whether a graceful stop has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Build the axum router with all routes.
    pub fn router(&self, handler: Arc<dyn BridgeHandler>) -> Router {
        let state = AppState {
            handler,
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            authenticator: self.authenticator.clone(),
            tracker: self.tracker.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route(STREAM_PATH, get(stream_handler));
        if self.metrics.is_some() {
            router = router.route("/metrics", get(metrics_handler));
        }
        router.with_state(state)
    }

    /// Bind the listen address and serve in a background task.
    ///
    /// Binding errors (address in use, bad TLS material) are returned here.
    /// The task resolves after a graceful stop triggered by `cancel` or
    /// [`BridgeServer::close`].
    pub async fn listen<H: BridgeHandler>(
        &self,
        handler: Arc<H>,
        cancel: &CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let tls_config = match (&self.options.tls_cert, &self.options.tls_key, self.options.insecure) {
            (Some(cert), Some(key), false) => Some(tls::server_config(cert, key).await?),
            _ => None,
        };

        let listener = TcpListener::bind(&self.options.address)
            .await
            .map_err(|e| BridgeError::Transport(format!("listen {}: {e}", self.options.address)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        let bound = match tls_config {
            None => Bound::Plain(listener),
            Some(config) => Bound::Tls(
                listener
                    .into_std()
                    .map_err(|e| BridgeError::Transport(e.to_string()))?,
                config,
            ),
        };

        let app = self.router(handler);
        let shutdown = Arc::clone(&self.shutdown);
        let tracker = self.tracker.clone();
        let grace = self.options.graceful_shutdown_timeout;
        let cancel = cancel.clone();

        info!(%addr, tls = matches!(bound, Bound::Tls(..)), "bridge server listening");

        let task = tokio::spawn(async move {
            let stop = shutdown.token();
            let serve = serve_bound(bound, app, stop.clone(), grace);
            let drain = async {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = stop.cancelled() => {}
                }
                info!("bridge server shutting down");
                shutdown.drain(&tracker, grace).await;
            };
            let (result, ()) = tokio::join!(serve, drain);
            info!("bridge server stopped");
            result
        });
        Ok((addr, task))
    }

    /// Serve until `cancel` fires or [`BridgeServer::close`] is called, then
    /// stop gracefully.
    pub async fn serve<H: BridgeHandler>(&self, handler: Arc<H>, cancel: &CancellationToken) -> Result<()> {
        let (_addr, task) = self.listen(handler, cancel).await?;
        task.await
            .map_err(|e| BridgeError::Transport(format!("server task failed: {e}")))?
    }

    /// Begin a graceful stop. Idempotent; `serve` returns once sessions end.
    pub fn close(&self) {
        self.shutdown.shutdown();
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("address", &self.options.address)
            .field("insecure", &self.options.insecure)
            .field("authenticator", &self.authenticator.is_some())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

enum Bound {
    Plain(TcpListener),
    Tls(std::net::TcpListener, RustlsConfig),
}

/// Run the HTTP server on `bound` until `stop` fires and in-flight
/// connections finish.
async fn serve_bound(bound: Bound, app: Router, stop: CancellationToken, grace: Duration) -> Result<()> {
    match bound {
        Bound::Plain(listener) => axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .map_err(|e| BridgeError::Transport(e.to_string())),
        Bound::Tls(listener, config) => {
            let handle = axum_server::Handle::new();
            let watcher = handle.clone();
            let _ = tokio::spawn(async move {
                stop.cancelled().await;
                watcher.graceful_shutdown(Some(grace));
            });
            axum_server::from_tcp_rustls(listener, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| BridgeError::Transport(e.to_string()))
        }
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.registry.count().await;
    Json(health::health_check(
        state.start_time,
        sessions,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /bridge/v1/stream
async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let metadata = stream_metadata(&headers);
    let principal = match &state.authenticator {
        Some(authenticator) => match authenticator.authenticate(&metadata).await {
            Ok(principal) => Some(principal),
            Err(rejection) => {
                counter!(AUTH_REJECTIONS_TOTAL).increment(1);
                warn!(reason = %rejection.reason, "bridge stream rejected");
                return rejection_response(&rejection);
            }
        },
        None => None,
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let trace_id = extract_trace_id(&metadata);
    let session_task = state.tracker.token();
    upgrade.on_upgrade(move |socket| async move {
        let _session_task = session_task;
        let (sink, frames) = ws::split_axum::<ClientFrame, ServerFrame>(socket);
        let ctx = StreamContext {
            metadata,
            trace_id,
            principal,
            registry: state.registry,
            shutdown: state.shutdown.force_token(),
        };
        let _ = serve_stream(frames, Box::new(sink), state.handler, ctx).await;
    })
}

/// Upgrade headers as stream metadata. Non-UTF-8 values are skipped.
fn stream_metadata(headers: &HeaderMap) -> StreamMetadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_owned()))
        })
        .collect()
}

fn rejection_response(rejection: &AuthRejection) -> Response {
    let status = StatusCode::from_u16(rejection.code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED);
    let mut body = ErrorPayload::from(rejection.code);
    if !rejection.reason.is_empty() {
        body.message.clone_from(&rejection.reason);
    }
    (status, Json(body)).into_response()
}
