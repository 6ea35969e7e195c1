//! Peer-symmetric JSON-RPC 2.0 runtime.
//!
//! This crate is the core of tandem: either end of a connection may
//! originate calls, send notifications, dispatch inbound requests to
//! registered handlers, and correlate inbound responses with its own
//! outstanding calls. The engine is transport-agnostic; the same
//! dispatch pipeline drives raw byte streams, header-framed streams,
//! datagram sockets, and the HTTP/WebSocket collaborators in the sibling
//! crates.
//!
//! # Architecture
//!
//! - [`protocol`]: the message [`Envelope`], the polymorphic request
//!   [`Id`], and the error taxonomy.
//! - [`transport`]: the [`Transport`] contract plus the stream and UDP
//!   implementations.
//! - [`handler`]: typed registration combinators producing the erased
//!   handler and callback descriptors.
//! - [`server`]: the shared dispatch core with the method table,
//!   matchers, hooks, and identifier minting.
//! - [`conn`]: the long-lived serve loop binding one server to one
//!   transport.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use tandem_core::{Connection, Result, Server, StreamTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Default, serde::Deserialize)]
//! struct Greet { name: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let seq = Arc::new(AtomicI64::new(0));
//!     let server = Arc::new(Server::new(move || {
//!         seq.fetch_add(1, Ordering::Relaxed).to_string()
//!     }));
//!     server.register("greet", |_notify, p: &Greet, out: &mut String| -> Result<()> {
//!         *out = format!("hello, {}", p.name);
//!         Ok(())
//!     });
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8989").await?;
//!     let (stream, _) = listener.accept().await?;
//!     let conn = Connection::new(server, StreamTransport::from_tcp(false, stream, None));
//!     conn.serve(CancellationToken::new()).await
//! }
//! ```

pub mod conn;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;

pub use conn::Connection;
pub use handler::Handler;
pub use protocol::envelope::{Envelope, Id, IdSlot, VERSION};
pub use protocol::error::{
    Error, ErrorObject, Result, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
pub use server::Server;
pub use transport::{StreamTransport, Transport, UdpTransport};
