//! Datagram transport: one envelope per UDP datagram.
//!
//! A datagram either is the JSON envelope itself, or (with header
//! framing enabled) carries the same header block the stream transport
//! uses, followed by the body, all inside a single datagram payload.
//!
//! # Addressing
//!
//! In unconnected (server) mode the socket has no fixed peer: every read
//! captures the sender's address, and every write targets the address
//! captured last. A server can therefore only answer the most recent
//! client; with several clients interleaving requests, delivery of
//! server-initiated messages is not guaranteed to reach the intended
//! one. Connected (client) mode uses the connected socket directly.
//!
//! # Example
//!
//! ```no_run
//! use tandem_core::transport::UdpTransport;
//!
//! # async fn run() -> tandem_core::Result<()> {
//! let server = UdpTransport::bind(false, "127.0.0.1:8990").await?;
//! let client = UdpTransport::connect(false, "127.0.0.1:8990", None).await?;
//! # let _ = (server, client); Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::Duration;

use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::protocol::envelope::Envelope;
use crate::protocol::error::{Error, Result};
use crate::transport::stream::{frame_head, read_framed, ByteReader};
use crate::transport::Transport;

/// Largest payload a single read accepts; the practical ceiling of a
/// UDP datagram.
const MAX_DATAGRAM: usize = 65_536;

/// Envelope transport over a UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
    header: bool,
    connected: bool,
    read_timeout: Option<Duration>,
    /// Sender of the most recent datagram; write target in unconnected
    /// mode.
    peer: RwLock<Option<SocketAddr>>,
}

impl UdpTransport {
    /// Binds an unconnected server-side socket.
    ///
    /// Responses go to whichever peer sent the most recent datagram.
    pub async fn bind(header: bool, addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(UdpTransport {
            socket,
            header,
            connected: false,
            read_timeout: None,
            peer: RwLock::new(None),
        })
    }

    /// Connects a client-side socket to `remote`.
    ///
    /// `local` picks the local address; it defaults to an ephemeral
    /// port on all interfaces.
    pub async fn connect(
        header: bool,
        remote: impl ToSocketAddrs,
        local: Option<&str>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(local.unwrap_or("0.0.0.0:0")).await?;
        socket.connect(remote).await?;
        Ok(UdpTransport {
            socket,
            header,
            connected: true,
            read_timeout: None,
            peer: RwLock::new(None),
        })
    }

    /// Sets a per-read deadline; expiry surfaces as
    /// [`Error::Deadline`].
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn receive(&self) -> Result<Envelope> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = if self.connected {
            self.socket.recv(&mut buf).await?
        } else {
            let (n, addr) = self.socket.recv_from(&mut buf).await?;
            *self.peer.write().unwrap() = Some(addr);
            n
        };
        decode_datagram(self.header, &buf[..n]).await
    }
}

/// Decodes one datagram payload, honoring the framing discipline.
async fn decode_datagram(header: bool, payload: &[u8]) -> Result<Envelope> {
    if header {
        read_framed(&mut ByteReader::new(payload)).await
    } else {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn read(&self) -> Result<Envelope> {
        match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.receive()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Deadline),
            },
            None => self.receive().await,
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_vec(envelope)?;
        let payload = if self.header {
            let mut framed = frame_head(body.len()).into_bytes();
            framed.extend_from_slice(&body);
            framed
        } else {
            body
        };

        if self.connected {
            self.socket.send(&payload).await?;
        } else {
            let target = *self.peer.read().unwrap();
            let Some(target) = target else {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no datagram received yet, peer address unknown",
                )));
            };
            self.socket.send_to(&payload, target).await?;
        }
        Ok(())
    }

    /// UDP holds no per-connection state to tear down; the socket itself
    /// is released on drop.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
