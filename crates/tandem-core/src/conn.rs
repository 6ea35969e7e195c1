//! Long-lived connection: the serve loop and the callback table.
//!
//! A [`Connection`] binds one [`Server`] to one [`Transport`]. The two
//! ends of a JSON-RPC session are peers: both sides construct a
//! connection the same way, and either may originate calls with
//! [`notify`](Connection::notify) and [`send`](Connection::send) while
//! [`serve`](Connection::serve) dispatches whatever arrives.
//!
//! # Serve Loop
//!
//! The loop selects over three events: cancellation, the next inbound
//! envelope, and completion of previously spawned dispatch tasks. Every
//! envelope dispatches on its own task, so slow handlers never stall the
//! reader; responses are correlated with outstanding calls purely by
//! identifier.
//!
//! Cancellation closes the transport and drains the in-flight tasks
//! before returning [`Error::Cancelled`]. A blocked read is interrupted
//! by the select itself; a per-read deadline on the transport
//! additionally bounds how long an idle connection holds on to buffered
//! state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use tandem_core::{Connection, Server, StreamTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> tandem_core::Result<()> {
//! let seq = Arc::new(AtomicI64::new(0));
//! let server = Arc::new(Server::new(move || {
//!     seq.fetch_add(1, Ordering::Relaxed).to_string()
//! }));
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:8989").await?;
//! let conn = Connection::new(server, StreamTransport::from_tcp(false, stream, None));
//!
//! let shutdown = CancellationToken::new();
//! conn.send("sum", Some(&[1, 2]), |total: &i64| {
//!     println!("sum = {total}");
//!     Ok(())
//! })
//! .await?;
//! conn.serve(shutdown).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::handler::Callback;
use crate::protocol::envelope::Envelope;
use crate::protocol::error::{Error, Result};
use crate::server::Server;
use crate::transport::Transport;

/// One peer of a JSON-RPC session.
///
/// Cloning is cheap and shares the underlying transport, server and
/// callback table; dispatch tasks hold clones.
#[derive(Clone)]
pub struct Connection {
    server: Arc<Server>,
    transport: Arc<dyn Transport>,
    callbacks: Arc<Mutex<HashMap<String, Callback>>>,
}

impl Connection {
    /// Binds a server to a transport.
    ///
    /// The connection owns the transport: cancelling the serve loop
    /// closes it, exactly once.
    pub fn new(server: Arc<Server>, transport: impl Transport + 'static) -> Self {
        Connection {
            server,
            transport: Arc::new(transport),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sends a notification: fire-and-forget, the peer never answers.
    pub async fn notify<P>(&self, method: &str, params: Option<&P>) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.server
            .request(self.transport.as_ref(), true, method, params)
            .await
            .map(|_| ())
    }

    /// Sends a request and registers `callback` for its response.
    ///
    /// The callback is keyed by the freshly minted identifier and
    /// registered before the request reaches the wire, so a response
    /// cannot race past it. It runs at most once, on the dispatch task
    /// that receives the matching response; a response carrying an error
    /// object goes to the server's inbound-error handler instead.
    pub async fn send<P, R, F>(&self, method: &str, params: Option<&P>, callback: F) -> Result<()>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned + Default + 'static,
        F: FnOnce(&R) -> Result<()> + Send + 'static,
    {
        let request = self.server.make_request(false, method, params)?;
        let Some(id) = request.id.as_id() else {
            return Err(Error::handler("outbound request minted without an id"));
        };
        let key = id.to_string();

        self.callbacks
            .lock()
            .unwrap()
            .insert(key.clone(), Callback::new(callback));

        if let Err(err) = self.transport.write(&request).await {
            self.callbacks.lock().unwrap().remove(&key);
            return Err(err);
        }
        Ok(())
    }

    /// Runs the event loop until `shutdown` fires or the transport
    /// fails unrecoverably.
    ///
    /// Per-iteration errors (framing problems, dispatch failures,
    /// orphaned responses) are logged and absorbed; the loop only ends
    /// on cancellation (returning [`Error::Cancelled`]) or on an I/O
    /// error from the transport's read side. Either way the transport is
    /// closed and every in-flight dispatch task completes before this
    /// returns.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks: JoinSet<()> = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break Err(Error::Cancelled),

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}

                next = self.server.read(self.transport.as_ref()) => match next {
                    Ok(Some(envelope)) => {
                        let conn = self.clone();
                        tasks.spawn(async move { conn.dispatch(envelope).await });
                    }
                    Ok(None) => {}
                    Err(err) if err.is_fatal() => {
                        tracing::warn!(error = %err, "transport failed, closing connection");
                        break Err(err);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "read error");
                    }
                },
            }
        };

        let closed = self.transport.close().await;
        while tasks.join_next().await.is_some() {}
        closed?;
        outcome
    }

    async fn dispatch(&self, envelope: Envelope) {
        if envelope.is_request() {
            if let Err(err) = self
                .server
                .dispatch(self.transport.as_ref(), &envelope)
                .await
            {
                tracing::warn!(method = %envelope.method, error = %err, "dispatch failed");
            }
            return;
        }

        if let Some(error) = &envelope.error {
            self.server.handle_inbound_error(error);
            return;
        }

        let Some(id) = envelope.id.as_id() else {
            tracing::warn!("response without an id dropped");
            return;
        };

        let callback = self.callbacks.lock().unwrap().remove(&id.to_string());
        match callback {
            Some(callback) => {
                if let Err(err) = callback.call(&envelope) {
                    tracing::warn!(id = %id, error = %err, "callback failed");
                }
            }
            None => tracing::warn!(id = %id, "no callback registered for response"),
        }
    }
}
