//! Sidecar-side bridge client: reconnecting stream, subscriptions, and
//! bounded ingress publishing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};
use transport_core::{TransportEnvelope, normalize_envelope};

use crate::backoff::Backoff;
use crate::delivery::Delivery;
use crate::errors::{BridgeError, Result};
use crate::frame::{Ack, ClientFrame, EnvelopeFrame, HeartbeatFrame, RegisterFrame, ServerFrame};
use crate::heartbeat::run_heartbeat;
use crate::metrics::{
    CLIENT_CONNECTED, FRAMES_RECEIVED_TOTAL, FRAMES_SENT_TOTAL, PUBLISH_ERRORS_TOTAL, RECONNECTS_TOTAL,
};
use crate::options::BridgeOptions;
use crate::transport::ws::WsDialer;
use crate::transport::{ClientSink, Dialer, FrameStream};

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started.
    Idle,
    /// Dialing and registering.
    Connecting,
    /// Register sent; heartbeat and receive loops running.
    Registered,
    /// Between connections, waiting to redial.
    Disconnected,
    /// Closed for good.
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// Handle on one inbound channel (deliver or broadcast).
///
/// Clones share the channel: each envelope goes to exactly one receiver.
/// Yields `None` once the client has closed and the queue is empty.
#[derive(Clone)]
pub struct Subscription {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TransportEnvelope>>>,
}

impl Subscription {
    fn new(rx: mpsc::Receiver<TransportEnvelope>) -> Self {
        Self {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Next envelope, or `None` after close.
    pub async fn recv(&self) -> Option<TransportEnvelope> {
        self.rx.lock().await.recv().await
    }

    /// The subscription as a stream.
    pub fn into_stream(self) -> impl Stream<Item = TransportEnvelope> + Send {
        futures::stream::unfold(self, |sub| async move { sub.recv().await.map(|env| (env, sub)) })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link: one live connection
// ─────────────────────────────────────────────────────────────────────────────

struct Link {
    sink: tokio::sync::Mutex<ClientSink>,
    token: CancellationToken,
}

impl Link {
    async fn send(&self, frame: &ClientFrame) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(BridgeError::Closed),
            result = async { self.sink.lock().await.send(frame).await } => {
                if result.is_ok() {
                    counter!(FRAMES_SENT_TOTAL, "side" => "client", "kind" => frame.kind()).increment(1);
                }
                result
            }
        }
    }

    async fn close(&self) {
        self.token.cancel();
        let _ = self.sink.lock().await.close(None).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Reconnecting bridge client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: BridgeOptions,
    dialer: Arc<dyn Dialer>,
    deliver_tx: Mutex<Option<mpsc::Sender<TransportEnvelope>>>,
    broadcast_tx: Mutex<Option<mpsc::Sender<TransportEnvelope>>>,
    deliver: Subscription,
    broadcast: Subscription,
    link: RwLock<Option<Arc<Link>>>,
    slots: Option<Arc<Semaphore>>,
    state: watch::Sender<ConnectionState>,
    started: AtomicBool,
    closed: AtomicBool,
    run: OnceLock<CancellationToken>,
    tracker: TaskTracker,
}

impl BridgeClient {
    /// Client dialing over WebSocket. Fails on missing address, node id, or
    /// namespace.
    pub fn new(options: BridgeOptions) -> Result<Self> {
        Self::with_dialer(options, Arc::new(WsDialer))
    }

    /// Client using a custom [`Dialer`].
    pub fn with_dialer(options: BridgeOptions, dialer: Arc<dyn Dialer>) -> Result<Self> {
        let options = options.normalized_for_client()?;
        let (deliver_tx, deliver_rx) = mpsc::channel(options.deliver_buffer_size);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(options.broadcast_buffer_size);
        let slots = options.backpressure_limit().map(|n| Arc::new(Semaphore::new(n)));
        let (state, _) = watch::channel(ConnectionState::Idle);
        Ok(Self {
            inner: Arc::new(ClientInner {
                options,
                dialer,
                deliver_tx: Mutex::new(Some(deliver_tx)),
                broadcast_tx: Mutex::new(Some(broadcast_tx)),
                deliver: Subscription::new(deliver_rx),
                broadcast: Subscription::new(broadcast_rx),
                link: RwLock::new(None),
                slots,
                state,
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                run: OnceLock::new(),
                tracker: TaskTracker::new(),
            }),
        })
    }

    /// Effective options after defaults were applied.
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Start the connect-and-run supervisor. Returns immediately; later
    /// calls are no-ops. Cancelling `cancel` stops the client for good.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let run = inner.run.get_or_init(|| cancel.child_token()).clone();
        if inner.closed.load(Ordering::SeqCst) {
            run.cancel();
        }
        let _ = inner.tracker.spawn(supervise(Arc::clone(inner), run));
        Ok(())
    }

    /// Send an envelope to the worker as an Ingress frame.
    ///
    /// Fails with `NotStarted` while no stream is registered. With
    /// backpressure enabled, waits for a slot first; `cancel` aborts that
    /// wait with `Cancelled`.
    pub async fn publish_ingress(&self, cancel: &CancellationToken, mut envelope: TransportEnvelope) -> Result<()> {
        let link = self.inner.current_link()?;
        let _permit = match &self.inner.slots {
            Some(slots) => {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(BridgeError::Cancelled),
                    permit = Arc::clone(slots).acquire_owned() => permit.map_err(|_| BridgeError::Closed)?,
                };
                Some(permit)
            }
            None => None,
        };
        normalize_envelope(&mut envelope);
        let result = link.send(&ClientFrame::Ingress(EnvelopeFrame { envelope })).await;
        if let Err(e) = &result {
            counter!(PUBLISH_ERRORS_TOTAL).increment(1);
            debug!(error = %e, "publish ingress failed");
        }
        result
    }

    /// Send an Ack frame.
    pub async fn publish_ack(&self, cancel: &CancellationToken, ack: Ack) -> Result<()> {
        let link = self.inner.current_link()?;
        let frame = ClientFrame::Ack(ack);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
            result = link.send(&frame) => result,
        }
    }

    /// Envelopes from Deliver frames.
    pub fn subscribe_deliver(&self) -> Subscription {
        self.inner.deliver.clone()
    }

    /// Envelopes from Broadcast frames.
    pub fn subscribe_broadcast(&self) -> Subscription {
        self.inner.broadcast.clone()
    }

    /// Wrap a received envelope so that acking it sends an `ok` Ack frame
    /// carrying its message id and broadcast id.
    pub fn delivery(&self, envelope: TransportEnvelope) -> Delivery {
        let ack = Ack::ok(envelope.message_id(), envelope.broadcast_id());
        let client = self.clone();
        let cancel = self.inner.run.get().cloned().unwrap_or_default();
        Delivery::new(envelope, move || {
            async move { client.publish_ack(&cancel, ack).await }.boxed()
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Close, then wait up to `timeout` for every internal task to finish.
    ///
    /// A deadline that has passed once the client is closed is reported as
    /// [`BridgeError::DrainTimeout`] even if the tasks already stopped.
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.close().await;
        let _ = self.inner.tracker.close();
        if tokio::time::Instant::now() >= deadline {
            return Err(BridgeError::DrainTimeout);
        }
        tokio::time::timeout_at(deadline, self.inner.tracker.wait())
            .await
            .map_err(|_| BridgeError::DrainTimeout)
    }

    /// Stop the client: cancel internal tasks, close the stream's send half,
    /// and end both subscriptions. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(run) = inner.run.get() {
            run.cancel();
        }
        let link = inner.link.write().take();
        if let Some(link) = link {
            link.close().await;
        }
        inner.close_channels();
        if !inner.started.load(Ordering::SeqCst) {
            inner.set_state(ConnectionState::Closed);
        }
        info!(node_id = %inner.options.node_id, "bridge client closed");
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("address", &self.inner.options.address)
            .field("node_id", &self.inner.options.node_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn current_link(&self) -> Result<Arc<Link>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        self.link.read().clone().ok_or(BridgeError::NotStarted)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }

    fn close_channels(&self) {
        drop(self.deliver_tx.lock().take());
        drop(self.broadcast_tx.lock().take());
    }

    /// Dial, register, and spawn the heartbeat and receive loops.
    ///
    /// The returned receiver fires when the receive loop stops.
    async fn connect(self: &Arc<Self>, run: &CancellationToken) -> Result<(Arc<Link>, oneshot::Receiver<BridgeError>)> {
        let dial_timeout = self.options.dial_timeout;
        let (mut sink, frames) = tokio::time::timeout(dial_timeout, self.dial_and_register())
            .await
            .map_err(|_| BridgeError::Transport(format!("dial timed out after {dial_timeout:?}")))??;

        let deliver = self.deliver_tx.lock().clone();
        let broadcast = self.broadcast_tx.lock().clone();
        let (Some(deliver), Some(broadcast)) = (deliver, broadcast) else {
            let _ = sink.close(None).await;
            return Err(BridgeError::Closed);
        };

        let link = Arc::new(Link {
            sink: tokio::sync::Mutex::new(sink),
            token: run.child_token(),
        });
        *self.link.write() = Some(Arc::clone(&link));

        let heartbeat_link = Arc::clone(&link);
        let interval = self.options.heartbeat_interval;
        let _ = self.tracker.spawn(async move {
            let token = heartbeat_link.token.clone();
            run_heartbeat(interval, token, move |nonce| {
                let link = Arc::clone(&heartbeat_link);
                async move { link.send(&ClientFrame::Heartbeat(HeartbeatFrame { nonce })).await }
            })
            .await;
        });

        let (ended_tx, ended_rx) = oneshot::channel();
        let _ = self.tracker.spawn(receive_loop(
            frames,
            deliver,
            broadcast,
            link.token.clone(),
            ended_tx,
        ));
        Ok((link, ended_rx))
    }

    async fn dial_and_register(&self) -> Result<(ClientSink, FrameStream<ServerFrame>)> {
        let (mut sink, frames) = self.dialer.dial(&self.options).await?;
        let register = ClientFrame::Register(RegisterFrame {
            node_id: self.options.node_id.clone(),
            namespace: self.options.namespace.clone(),
            supported_versions: self.options.supported_versions.clone(),
            bridge_version: self.options.bridge_version.clone(),
        });
        if let Err(e) = sink.send(&register).await {
            let _ = sink.close(None).await;
            return Err(e);
        }
        Ok((sink, frames))
    }

    async fn teardown(&self, link: &Arc<Link>) {
        {
            let mut current = self.link.write();
            if current.as_ref().is_some_and(|l| Arc::ptr_eq(l, link)) {
                *current = None;
            }
        }
        link.close().await;
    }
}

/// Connect, run until the stream drops, and redial until cancelled.
#[instrument(skip_all, fields(node_id = %inner.options.node_id, namespace = %inner.options.namespace))]
async fn supervise(inner: Arc<ClientInner>, run: CancellationToken) {
    let mut backoff = Backoff::new(inner.options.reconnect_backoff_base, inner.options.reconnect_backoff_max);

    while !run.is_cancelled() {
        inner.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            biased;
            () = run.cancelled() => break,
            result = inner.connect(&run) => result,
        };

        match connected {
            Ok((link, ended)) => {
                backoff.reset();
                inner.set_state(ConnectionState::Registered);
                gauge!(CLIENT_CONNECTED).set(1.0);
                info!(address = %inner.options.address, "bridge stream registered");

                let reason = tokio::select! {
                    () = run.cancelled() => None,
                    reason = ended => reason.ok(),
                };
                inner.teardown(&link).await;
                gauge!(CLIENT_CONNECTED).set(0.0);
                if run.is_cancelled() {
                    break;
                }
                inner.set_state(ConnectionState::Disconnected);
                counter!(RECONNECTS_TOTAL).increment(1);
                match reason {
                    Some(err) => warn!(error = %err, "bridge stream lost, reconnecting"),
                    None => warn!("bridge stream lost, reconnecting"),
                }
            }
            Err(err) => {
                inner.set_state(ConnectionState::Disconnected);
                counter!(RECONNECTS_TOTAL).increment(1);
                let delay = backoff.next_delay();
                warn!(
                    error = %err,
                    attempt = backoff.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "bridge connect failed, retrying"
                );
                tokio::select! {
                    () = run.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let link = inner.link.write().take();
    if let Some(link) = link {
        link.close().await;
    }
    inner.close_channels();
    inner.closed.store(true, Ordering::SeqCst);
    inner.set_state(ConnectionState::Closed);
    debug!("bridge supervisor stopped");
}

/// Route inbound frames to the subscription channels.
///
/// A full channel stalls the stream. Stops on cancellation, read error, or
/// end of stream; the latter two are reported through `ended`.
async fn receive_loop(
    mut frames: FrameStream<ServerFrame>,
    deliver: mpsc::Sender<TransportEnvelope>,
    broadcast: mpsc::Sender<TransportEnvelope>,
    token: CancellationToken,
    ended: oneshot::Sender<BridgeError>,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return,
            frame = frames.next() => frame,
        };
        let frame = match next {
            None => {
                let _ = ended.send(BridgeError::Transport("stream closed by server".into()));
                return;
            }
            Some(Err(err)) => {
                let _ = ended.send(err);
                return;
            }
            Some(Ok(frame)) => frame,
        };
        counter!(FRAMES_RECEIVED_TOTAL, "side" => "client", "kind" => frame.kind()).increment(1);

        let (channel, envelope) = match frame {
            ServerFrame::Deliver(frame) => (&deliver, frame.envelope),
            ServerFrame::Broadcast(frame) => (&broadcast, frame.envelope),
            ServerFrame::Heartbeat(heartbeat) => {
                debug!(nonce = %heartbeat.nonce, "server heartbeat");
                continue;
            }
        };
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            sent = channel.send(envelope) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryConnection, MemoryDialer};
    use assert_matches::assert_matches;
    use transport_core::Message;

    fn options() -> BridgeOptions {
        BridgeOptions {
            node_id: "node-1".into(),
            namespace: "chat".into(),
            insecure: true,
            ..BridgeOptions::new("memory")
        }
    }

    fn client(options: BridgeOptions) -> (BridgeClient, Arc<MemoryDialer>, mpsc::UnboundedReceiver<MemoryConnection>) {
        let (dialer, conns) = MemoryDialer::new(16);
        let client = BridgeClient::with_dialer(options, Arc::clone(&dialer) as Arc<dyn Dialer>).unwrap();
        (client, dialer, conns)
    }

    async fn wait_for(client: &BridgeClient, state: ConnectionState) {
        let mut changes = client.state_changes();
        let _ = changes.wait_for(|s| *s == state).await.unwrap();
    }

    fn deliver(action: &str) -> Result<ServerFrame> {
        Ok(ServerFrame::Deliver(EnvelopeFrame {
            envelope: TransportEnvelope::new(Message::text(action, "x")),
        }))
    }

    #[test]
    fn new_validates_options() {
        let mut opts = options();
        opts.node_id.clear();
        assert_matches!(BridgeClient::new(opts), Err(BridgeError::Config(_)));
    }

    #[tokio::test]
    async fn publish_before_start_is_not_started() {
        let (client, _dialer, _conns) = client(options());
        let cancel = CancellationToken::new();
        assert_eq!(
            client.publish_ingress(&cancel, TransportEnvelope::default()).await,
            Err(BridgeError::NotStarted)
        );
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn registers_then_publishes_normalized_ingress() {
        let mut opts = options();
        let _ = opts.metadata_headers.insert("authorization".into(), "Bearer t".into());
        let (client, _dialer, mut conns) = client(opts);
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        client.start(&cancel).unwrap();

        let mut conn = conns.recv().await.unwrap();
        assert_eq!(conn.metadata.get("authorization").map(String::as_str), Some("Bearer t"));
        let Some(ClientFrame::Register(register)) = conn.from_client.frames.recv().await else {
            panic!("expected register first");
        };
        assert_eq!(register.node_id, "node-1");
        assert_eq!(register.namespace, "chat");
        assert_eq!(register.supported_versions, vec![transport_core::PROTOCOL_VERSION.to_owned()]);
        wait_for(&client, ConnectionState::Registered).await;

        client
            .publish_ingress(&cancel, TransportEnvelope::new(Message::text("chat.send", "hi")))
            .await
            .unwrap();
        let Some(ClientFrame::Ingress(frame)) = conn.from_client.frames.recv().await else {
            panic!("expected ingress");
        };
        assert!(!frame.envelope.message_id().is_empty());
        assert!(frame.envelope.created_at.is_some());

        client.close().await;
    }

    #[tokio::test]
    async fn deliveries_and_broadcasts_are_routed_in_order() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let conn = conns.recv().await.unwrap();

        for action in ["a", "b", "c"] {
            conn.to_client.send(deliver(action)).await.unwrap();
        }
        conn.to_client
            .send(Ok(ServerFrame::Heartbeat(HeartbeatFrame::default())))
            .await
            .unwrap();
        conn.to_client
            .send(Ok(ServerFrame::Broadcast(EnvelopeFrame {
                envelope: TransportEnvelope::new(Message::text("all", "x")),
            })))
            .await
            .unwrap();

        let deliveries = client.subscribe_deliver();
        let mut actions = Vec::new();
        for _ in 0..3 {
            actions.push(deliveries.recv().await.unwrap().message.unwrap().action);
        }
        assert_eq!(actions, ["a", "b", "c"]);
        let broadcast = client.subscribe_broadcast().recv().await.unwrap();
        assert_eq!(broadcast.message.unwrap().action, "all");

        client.close().await;
        assert!(deliveries.recv().await.is_none());
    }

    #[tokio::test]
    async fn delivery_ack_sends_one_ack_frame() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let mut conn = conns.recv().await.unwrap();
        let _register = conn.from_client.frames.recv().await;
        wait_for(&client, ConnectionState::Registered).await;

        let mut envelope = TransportEnvelope::new(Message::text("chat", "x"));
        envelope.message.as_mut().unwrap().request_id = "m-1".into();
        let _ = envelope.attributes.insert("broadcast_id".into(), "b-1".into());

        let delivery = client.delivery(envelope);
        delivery.ack().await.unwrap();
        delivery.ack().await.unwrap();

        assert_eq!(
            conn.from_client.frames.recv().await,
            Some(ClientFrame::Ack(Ack::ok("m-1", "b-1")))
        );
        client.close().await;
        assert!(conn.from_client.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn backpressure_bounds_in_flight_publishes() {
        let mut opts = options();
        opts.enable_backpressure = true;
        opts.max_in_flight_deliver = 1;
        let (dialer, mut conns) = MemoryDialer::new(1);
        let client = BridgeClient::with_dialer(opts, dialer).unwrap();
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let mut conn = conns.recv().await.unwrap();
        wait_for(&client, ConnectionState::Registered).await;

        // Register fills the one-frame channel, so the first publish parks in
        // send while holding the only slot.
        let first = {
            let client = client.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .publish_ingress(&cancel, TransportEnvelope::new(Message::text("a", "1")))
                    .await
            })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = CancellationToken::new();
        let second = {
            let client = client.clone();
            let waiter = waiter.clone();
            tokio::spawn(async move {
                client
                    .publish_ingress(&waiter, TransportEnvelope::new(Message::text("b", "2")))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        waiter.cancel();
        assert_eq!(second.await.unwrap(), Err(BridgeError::Cancelled));

        let _register = conn.from_client.frames.recv().await;
        assert_eq!(first.await.unwrap(), Ok(()));
        let Some(ClientFrame::Ingress(frame)) = conn.from_client.frames.recv().await else {
            panic!("expected ingress");
        };
        assert_eq!(frame.envelope.message.unwrap().action, "a");
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_backoff_grows_and_resets() {
        let mut opts = options();
        opts.reconnect_backoff_base = Duration::from_secs(1);
        opts.reconnect_backoff_max = Duration::from_secs(4);
        let (client, dialer, mut conns) = client(opts);
        dialer.set_refusing(true);
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();

        // Attempts at t=0, 1, 3, 7, 11 (delays 1, 2, 4, 4).
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dialer.attempts(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dialer.attempts(), 2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(dialer.attempts(), 3);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(dialer.attempts(), 4);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(dialer.attempts(), 5);

        dialer.set_refusing(false);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(dialer.attempts(), 6);
        let conn = conns.recv().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Registered);

        // A lost stream is redialed at once; the next failure waits the base delay.
        dialer.set_refusing(true);
        drop(conn);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(dialer.attempts(), 7);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dialer.attempts(), 8);

        cancel.cancel();
        wait_for(&client, ConnectionState::Closed).await;
        assert_eq!(client.start(&cancel), Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn frames_are_not_replayed_after_reconnect() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();

        let mut first = conns.recv().await.unwrap();
        wait_for(&client, ConnectionState::Registered).await;
        client
            .publish_ingress(&cancel, TransportEnvelope::new(Message::text("before", "x")))
            .await
            .unwrap();
        drop(first.to_client);

        let mut second = conns.recv().await.unwrap();
        let _ = first.from_client.frames.recv().await;
        assert_eq!(second.from_client.frames.recv().await.unwrap().kind(), "register");
        wait_for(&client, ConnectionState::Registered).await;
        client
            .publish_ingress(&cancel, TransportEnvelope::new(Message::text("after", "x")))
            .await
            .unwrap();
        let Some(ClientFrame::Ingress(frame)) = second.from_client.frames.recv().await else {
            panic!("expected ingress");
        };
        assert_eq!(frame.envelope.message.unwrap().action, "after");
        client.close().await;
    }

    #[tokio::test]
    async fn drain_completes_and_closes() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let _conn = conns.recv().await.unwrap();
        wait_for(&client, ConnectionState::Registered).await;

        client.drain(Duration::from_secs(5)).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.subscribe_deliver().recv().await.is_none());
        assert_eq!(client.start(&cancel), Err(BridgeError::Closed));
        assert_eq!(
            client.publish_ingress(&cancel, TransportEnvelope::default()).await,
            Err(BridgeError::Closed)
        );
    }

    #[tokio::test]
    async fn drain_with_zero_timeout_reports_timeout() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let _conn = conns.recv().await.unwrap();
        wait_for(&client, ConnectionState::Registered).await;

        assert_eq!(client.drain(Duration::ZERO).await, Err(BridgeError::DrainTimeout));
        client.drain(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn close_before_start() {
        let (client, _dialer, _conns) = client(options());
        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.start(&CancellationToken::new()), Err(BridgeError::Closed));
        client.drain(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn publish_ack_requires_stream() {
        let (client, _dialer, _conns) = client(options());
        assert_eq!(
            client.publish_ack(&CancellationToken::new(), Ack::ok("m", "")).await,
            Err(BridgeError::NotStarted)
        );
    }

    #[tokio::test]
    async fn publish_ack_sends_failure_status() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let mut conn = conns.recv().await.unwrap();
        let _register = conn.from_client.frames.recv().await;
        wait_for(&client, ConnectionState::Registered).await;

        let ack = Ack {
            status: "rejected".into(),
            reason: "unknown action".into(),
            ..Ack::ok("m-2", "")
        };
        client.publish_ack(&cancel, ack.clone()).await.unwrap();
        assert_eq!(conn.from_client.frames.recv().await, Some(ClientFrame::Ack(ack)));

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert_eq!(
            client.publish_ack(&cancelled, Ack::ok("m-3", "")).await,
            Err(BridgeError::Cancelled)
        );
        client.close().await;
    }

    #[tokio::test]
    async fn subscription_stream_ends_after_close() {
        let (client, _dialer, mut conns) = client(options());
        let cancel = CancellationToken::new();
        client.start(&cancel).unwrap();
        let conn = conns.recv().await.unwrap();
        conn.to_client.send(deliver("one")).await.unwrap();

        let stream = client.subscribe_deliver().into_stream();
        let first = {
            let mut stream = Box::pin(stream);
            let env = stream.next().await.unwrap();
            client.close().await;
            assert!(stream.next().await.is_none());
            env
        };
        assert_eq!(first.message.unwrap().action, "one");
    }
}
