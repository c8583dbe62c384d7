//! WebSocket adapters: axum on the server, tokio-tungstenite on the client.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{self, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt, future};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tracing::debug;

use super::{ClientSink, CloseStatus, Dialer, FrameSink, FrameStream, tls};
use crate::codec;
use crate::errors::{BridgeError, Result};
use crate::frame::ServerFrame;
use crate::options::BridgeOptions;

// ─────────────────────────────────────────────────────────────────────────────
// Server side (axum)
// ─────────────────────────────────────────────────────────────────────────────

/// Sink over the write half of an upgraded axum socket.
pub struct AxumSink<F> {
    inner: SplitSink<WebSocket, ws::Message>,
    _frame: PhantomData<fn(F)>,
}

#[async_trait]
impl<F: Serialize + Send + Sync + 'static> FrameSink<F> for AxumSink<F> {
    async fn send(&mut self, frame: &F) -> Result<()> {
        let text = codec::encode(frame)?;
        self.inner
            .send(ws::Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn close(&mut self, status: Option<CloseStatus>) -> Result<()> {
        let frame = status.map(|s| ws::CloseFrame {
            code: s.code,
            reason: s.reason.into(),
        });
        // The peer may already be gone; closing is best effort.
        let _ = self.inner.send(ws::Message::Close(frame)).await;
        self.inner
            .close()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

/// Split an upgraded socket into frame halves.
pub fn split_axum<In, Out>(socket: WebSocket) -> (AxumSink<Out>, FrameStream<In>)
where
    In: DeserializeOwned + Send + 'static,
{
    let (sink, stream) = socket.split();
    let frames = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(ws::Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(ws::Message::Text(text)) => Some(codec::decode(text.as_str())),
                Ok(ws::Message::Binary(bytes)) => Some(codec::decode_bytes(&bytes)),
                Ok(_) => None,
                Err(e) => Some(Err(BridgeError::Transport(e.to_string()))),
            })
        });
    (
        AxumSink {
            inner: sink,
            _frame: PhantomData,
        },
        Box::pin(frames),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Client side (tokio-tungstenite)
// ─────────────────────────────────────────────────────────────────────────────

/// Sink over the write half of a tungstenite socket.
pub struct TungsteniteSink<S, F> {
    inner: S,
    _frame: PhantomData<fn(F)>,
}

impl<S, F> TungsteniteSink<S, F> {
    /// Wrap a message sink.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _frame: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F> FrameSink<F> for TungsteniteSink<S, F>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin + Send,
    F: Serialize + Send + Sync + 'static,
{
    async fn send(&mut self, frame: &F) -> Result<()> {
        let text = codec::encode(frame)?;
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn close(&mut self, status: Option<CloseStatus>) -> Result<()> {
        let frame = status.map(|s| CloseFrame {
            code: CloseCode::from(s.code),
            reason: s.reason.into(),
        });
        let _ = self.inner.send(Message::Close(frame)).await;
        self.inner
            .close()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

/// Decode frames from a tungstenite message stream.
pub fn tungstenite_frames<S, F>(stream: S) -> FrameStream<F>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Send + 'static,
    F: DeserializeOwned + Send + 'static,
{
    let frames = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(codec::decode(text.as_str())),
                Ok(Message::Binary(bytes)) => Some(codec::decode_bytes(&bytes)),
                Ok(_) => None,
                Err(e) => Some(Err(BridgeError::Transport(e.to_string()))),
            })
        });
    Box::pin(frames)
}

/// Dials the bridge server over WebSocket, with TLS unless `insecure`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, options: &BridgeOptions) -> Result<(ClientSink, FrameStream<ServerFrame>)> {
        let url = options.stream_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Config(format!("invalid address {url}: {e}")))?;
        for (name, value) in &options.metadata_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BridgeError::Config(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| BridgeError::Config(format!("header {name}: {e}")))?;
            let _ = request.headers_mut().insert(name, value);
        }

        let connector = if options.insecure {
            None
        } else {
            let config = tls::client_config(options.tls_cert.as_deref(), options.tls_key.as_deref())?;
            Some(Connector::Rustls(Arc::new(config)))
        };

        let (socket, _response) = connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(dial_error)?;
        debug!(%url, "bridge stream connected");

        let (sink, stream) = socket.split();
        let sink: ClientSink = Box::new(TungsteniteSink::new(sink));
        Ok((sink, tungstenite_frames(stream)))
    }
}

fn dial_error(err: tungstenite::Error) -> BridgeError {
    match err {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            BridgeError::Unauthorized("server rejected stream credentials".into())
        }
        other => BridgeError::Transport(other.to_string()),
    }
}
