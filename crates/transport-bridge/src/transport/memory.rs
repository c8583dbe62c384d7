//! In-process transport over tokio channels.
//!
//! Used by tests to drive the client supervisor and the server dispatch loop
//! without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ClientSink, CloseStatus, Dialer, FrameSink, FrameStream};
use crate::errors::{BridgeError, Result};
use crate::frame::{ClientFrame, ServerFrame};
use crate::options::BridgeOptions;
use transport_core::StreamMetadata;

/// Sink half of an in-memory stream.
pub struct MemorySink<F> {
    tx: Option<mpsc::Sender<F>>,
    closed: Arc<Mutex<Option<CloseStatus>>>,
}

/// Reading end of a [`MemorySink`].
pub struct MemoryPeer<F> {
    /// Frames written to the sink, ending when the sink closes.
    pub frames: mpsc::Receiver<F>,
    closed: Arc<Mutex<Option<CloseStatus>>>,
}

impl<F> MemoryPeer<F> {
    /// Status passed to [`FrameSink::close`], if the sink was closed with one.
    pub fn close_status(&self) -> Option<CloseStatus> {
        self.closed.lock().clone()
    }
}

/// A bounded sink and its reading end.
pub fn channel<F>(capacity: usize) -> (MemorySink<F>, MemoryPeer<F>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = Arc::new(Mutex::new(None));
    (
        MemorySink {
            tx: Some(tx),
            closed: Arc::clone(&closed),
        },
        MemoryPeer { frames: rx, closed },
    )
}

/// Frame stream fed by a channel; ends when every sender is dropped.
pub fn stream<F: Send + 'static>(rx: mpsc::Receiver<Result<F>>) -> FrameStream<F> {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

#[async_trait]
impl<F: Clone + Send + Sync + 'static> FrameSink<F> for MemorySink<F> {
    async fn send(&mut self, frame: &F) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(BridgeError::Closed)?;
        tx.send(frame.clone())
            .await
            .map_err(|_| BridgeError::Transport("peer dropped".into()))
    }

    async fn close(&mut self, status: Option<CloseStatus>) -> Result<()> {
        if self.tx.take().is_some() {
            *self.closed.lock() = status;
        }
        Ok(())
    }
}

/// Test-side handle to one dialed connection.
pub struct MemoryConnection {
    /// Frames the client sent.
    pub from_client: MemoryPeer<ClientFrame>,
    /// Feeds the client's receive loop. Dropping it ends the stream.
    pub to_client: mpsc::Sender<Result<ServerFrame>>,
    /// Headers the client would have sent with the upgrade.
    pub metadata: StreamMetadata,
}

/// [`Dialer`] that hands each connection to the test instead of a socket.
pub struct MemoryDialer {
    capacity: usize,
    connections: mpsc::UnboundedSender<MemoryConnection>,
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryDialer {
    /// Dialer plus the receiver of every connection it opens.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryConnection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            capacity,
            connections: tx,
            refusing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    /// Make subsequent dials fail as if the server were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Dial attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, options: &BridgeOptions) -> Result<(ClientSink, FrameStream<ServerFrame>)> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("connection refused".into()));
        }
        let (sink, from_client) = channel(self.capacity);
        let (to_client, rx) = mpsc::channel(self.capacity.max(1));
        let metadata = options
            .metadata_headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        self.connections
            .send(MemoryConnection {
                from_client,
                to_client,
                metadata,
            })
            .map_err(|_| BridgeError::Transport("memory listener gone".into()))?;
        let sink: ClientSink = Box::new(sink);
        Ok((sink, stream(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HeartbeatFrame;
    use futures::StreamExt;

    #[tokio::test]
    async fn sink_delivers_until_closed() {
        let (mut sink, mut peer) = channel::<u32>(4);
        sink.send(&7).await.unwrap();
        sink.close(Some(CloseStatus::normal())).await.unwrap();
        assert_eq!(peer.frames.recv().await, Some(7));
        assert_eq!(peer.frames.recv().await, None);
        assert_eq!(peer.close_status(), Some(CloseStatus::normal()));
        assert_eq!(sink.send(&8).await, Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(2);
        let mut frames = stream::<u32>(rx);
        tx.send(Ok(1)).await.unwrap();
        drop(tx);
        assert_eq!(frames.next().await, Some(Ok(1)));
        assert_eq!(frames.next().await, None);
    }

    #[tokio::test]
    async fn dialer_hands_out_connections() {
        let (dialer, mut conns) = MemoryDialer::new(8);
        let mut opts = BridgeOptions::new("mem");
        let _ = opts.metadata_headers.insert("Authorization".into(), "Bearer t".into());

        let (mut sink, _frames) = dialer.dial(&opts).await.unwrap();
        let heartbeat = ClientFrame::Heartbeat(HeartbeatFrame { nonce: "1".into() });
        sink.send(&heartbeat).await.unwrap();

        let mut conn = conns.recv().await.unwrap();
        assert_eq!(conn.metadata.get("authorization").map(String::as_str), Some("Bearer t"));
        assert_eq!(conn.from_client.frames.recv().await, Some(heartbeat));

        dialer.set_refusing(true);
        assert!(dialer.dial(&opts).await.is_err());
        assert_eq!(dialer.attempts(), 2);
    }
}
