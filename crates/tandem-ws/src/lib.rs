//! WebSocket transport for tandem.
//!
//! One JSON-RPC envelope travels per WebSocket text frame; binary
//! frames are accepted on the inbound side for peers that prefer them.
//! Control frames (ping/pong) are handled below this layer and skipped.
//!
//! The transport wraps an already-upgraded
//! [`WebSocketStream`](tokio_tungstenite::WebSocketStream); dialing,
//! accepting and the upgrade handshake stay with the application.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use tandem_core::Connection;
//! use tandem_ws::WsTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(server: Arc<tandem_core::Server>) -> tandem_core::Result<()> {
//! let (ws, _) = tokio_tungstenite::connect_async("ws://127.0.0.1:8991/rpc")
//!     .await
//!     .map_err(|err| tandem_core::Error::Io(std::io::Error::new(
//!         std::io::ErrorKind::Other,
//!         err,
//!     )))?;
//!
//! let conn = Connection::new(server, WsTransport::new(ws));
//! conn.serve(CancellationToken::new()).await
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use tandem_core::{Envelope, Error, Result, Transport};

/// Envelope transport over a WebSocket stream.
///
/// The stream splits into independently locked halves, so the serve
/// loop reads while dispatch tasks write.
pub struct WsTransport<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an upgraded WebSocket stream.
    pub fn new(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        WsTransport {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

fn ws_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
}

fn closed_error() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "websocket closed",
    ))
}

#[async_trait::async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&self) -> Result<Envelope> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Binary(data))) => return Ok(serde_json::from_slice(&data)?),
                Some(Ok(Message::Close(_))) | None => return Err(closed_error()),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(ws_error(err)),
            }
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        let text = serde_json::to_string(envelope)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text)).await.map_err(ws_error)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        match sink.send(Message::Close(None)).await {
            Ok(()) => Ok(()),
            // The peer may already be gone by the time we close.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(ws_error(err)),
        }
    }
}
