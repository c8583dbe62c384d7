//! Per-stream server loop: registration gate, frame dispatch, teardown.

use std::sync::Arc;

use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, info, instrument, warn};
use transport_core::{Principal, StreamMetadata};

use crate::errors::{BridgeError, Result};
use crate::frame::{ClientFrame, RegisterFrame};
use crate::handler::BridgeHandler;
use crate::metrics::{
    FRAMES_RECEIVED_TOTAL, REGISTRATION_FAILURES_TOTAL, SESSION_DURATION_SECONDS, SESSIONS_ACTIVE,
    SESSIONS_TOTAL,
};
use crate::registry::SessionRegistry;
use crate::session::{BridgeSession, RegisterMeta};
use crate::transport::{CloseStatus, FrameStream, ServerSink};

/// Connection context gathered before the first frame.
pub struct StreamContext {
    /// Upgrade request headers, lowercase keys.
    pub metadata: StreamMetadata,
    /// Trace id from the upgrade request.
    pub trace_id: Option<String>,
    /// Authenticated identity.
    pub principal: Option<Principal>,
    /// Registry the session joins once registered.
    pub registry: Arc<SessionRegistry>,
    /// Fires when live sessions must stop.
    pub shutdown: CancellationToken,
}

/// Why the frame loop stopped.
enum Ended {
    PeerClosed,
    Shutdown,
    Failed(BridgeError),
}

/// Serve one stream until the peer leaves, a callback fails, or `shutdown`
/// fires.
///
/// 1. The first frame must be Register; anything else closes the stream
///    with a policy violation and no callbacks run.
/// 2. `on_register` runs; an error closes the stream without `on_close`.
/// 3. Frames are dispatched in arrival order. A duplicate Register is ignored.
/// 4. On exit the transport is closed with a status derived from the cause,
///    then `on_close` runs and the session leaves the registry.
#[instrument(
    name = "bridge_stream",
    skip_all,
    fields(trace_id = field::Empty, node_id = field::Empty, namespace = field::Empty)
)]
pub async fn serve_stream<H>(
    mut inbound: FrameStream<ClientFrame>,
    mut outbound: ServerSink,
    handler: Arc<H>,
    ctx: StreamContext,
) -> Result<()>
where
    H: BridgeHandler + ?Sized,
{
    if let Some(trace_id) = ctx.trace_id.as_deref() {
        let _ = Span::current().record("trace_id", trace_id);
    }

    let first = tokio::select! {
        biased;
        () = ctx.shutdown.cancelled() => {
            let _ = outbound.close(Some(CloseStatus::going_away())).await;
            return Err(BridgeError::Closed);
        }
        frame = inbound.next() => frame,
    };
    let register = match first {
        Some(Ok(ClientFrame::Register(register))) => register,
        Some(Ok(other)) => {
            debug!(kind = other.kind(), "first frame was not register");
            let err = BridgeError::Protocol("register frame required".into());
            return Err(reject(&mut outbound, "not_register", err).await);
        }
        Some(Err(err)) => return Err(reject(&mut outbound, "read", err).await),
        None => {
            counter!(REGISTRATION_FAILURES_TOTAL, "reason" => "eof").increment(1);
            debug!("stream closed before register");
            return Ok(());
        }
    };

    let session = register_session(register, outbound, &ctx);
    let meta = session.metadata();
    let _ = Span::current().record("node_id", meta.node_id.as_str());
    let _ = Span::current().record("namespace", meta.namespace.as_str());

    if let Err(err) = handler.on_register(&session, meta).await {
        counter!(REGISTRATION_FAILURES_TOTAL, "reason" => "handler").increment(1);
        warn!(error = %err, "registration rejected by handler");
        session.close_transport(CloseStatus::for_error(&err)).await;
        return Err(err);
    }

    ctx.registry.add(Arc::clone(&session)).await;
    counter!(SESSIONS_TOTAL, "namespace" => meta.namespace.clone()).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
    info!(
        session_id = session.id(),
        bridge_version = %meta.bridge_version,
        "node registered"
    );

    let ended = dispatch_frames(&mut inbound, handler.as_ref(), &session).await;

    let (status, reason) = match &ended {
        Ended::PeerClosed => (CloseStatus::normal(), None),
        Ended::Shutdown => (CloseStatus::going_away(), Some(BridgeError::Closed)),
        Ended::Failed(err) => (CloseStatus::for_error(err), Some(err.clone())),
    };
    session.close_transport(status).await;
    handler.on_close(&session, reason.as_ref()).await;
    ctx.registry.remove(session.id()).await;

    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(session.age().as_secs_f64());

    match ended {
        Ended::Failed(err) => {
            warn!(error = %err, "stream terminated");
            Err(err)
        }
        Ended::PeerClosed | Ended::Shutdown => {
            info!("stream closed");
            Ok(())
        }
    }
}

fn register_session(register: RegisterFrame, outbound: ServerSink, ctx: &StreamContext) -> Arc<BridgeSession> {
    let meta = RegisterMeta::from_frame(
        register,
        ctx.metadata.clone(),
        ctx.trace_id.clone(),
        ctx.principal.clone(),
    );
    Arc::new(BridgeSession::new(meta, outbound, ctx.shutdown.child_token()))
}

async fn reject(outbound: &mut ServerSink, reason: &'static str, err: BridgeError) -> BridgeError {
    counter!(REGISTRATION_FAILURES_TOTAL, "reason" => reason).increment(1);
    warn!(error = %err, "stream rejected before registration");
    let _ = outbound.close(Some(CloseStatus::for_error(&err))).await;
    err
}

async fn dispatch_frames<H>(inbound: &mut FrameStream<ClientFrame>, handler: &H, session: &Arc<BridgeSession>) -> Ended
where
    H: BridgeHandler + ?Sized,
{
    loop {
        let next = tokio::select! {
            biased;
            () = session.closed() => return Ended::Shutdown,
            frame = inbound.next() => frame,
        };
        let frame = match next {
            None => return Ended::PeerClosed,
            Some(Err(err)) => return Ended::Failed(err),
            Some(Ok(frame)) => frame,
        };
        counter!(FRAMES_RECEIVED_TOTAL, "side" => "server", "kind" => frame.kind()).increment(1);

        let result = match frame {
            ClientFrame::Register(_) => {
                debug!("duplicate register ignored");
                Ok(())
            }
            ClientFrame::Ingress(frame) => handler.on_ingress(session, frame.envelope).await,
            ClientFrame::Ack(ack) => handler.on_ack(session, ack).await,
            ClientFrame::Heartbeat(heartbeat) => handler.on_heartbeat(session, heartbeat.nonce).await,
        };
        if let Err(err) = result {
            return Ended::Failed(err);
        }
    }
}
