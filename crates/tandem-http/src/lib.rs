//! HTTP collaborator for tandem.
//!
//! HTTP is the one transport where the exchange shape is fixed by the
//! carrier: a single request carries exactly one envelope in, and the
//! response carries at most one envelope out. There is no long-lived
//! serve loop here; each HTTP exchange runs the read/dispatch pipeline
//! once against a throwaway single-exchange transport.
//!
//! # Components
//!
//! - [`HttpServer`]: middleware over a shared
//!   [`Server`](tandem_core::Server), usable as a hyper `service_fn`
//!   handler or driven directly with [`HttpServer::serve`].
//! - [`HttpClient`]: posts one envelope per call and decodes the typed
//!   result, minting sequential integer identifiers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use tandem_core::{Result, Server};
//! use tandem_http::HttpServer;
//!
//! # #[derive(Default, serde::Deserialize)]
//! # struct Sum { a: i64, b: i64 }
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let seq = Arc::new(AtomicI64::new(0));
//!     let server = Arc::new(Server::new(move || {
//!         seq.fetch_add(1, Ordering::Relaxed).to_string()
//!     }));
//!     server.register("sum", |_n, p: &Sum, out: &mut i64| -> Result<()> {
//!         *out = p.a + p.b;
//!         Ok(())
//!     });
//!
//!     HttpServer::new(server).serve("127.0.0.1:8990".parse().unwrap()).await
//! }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;

use tandem_core::transport::{validate_content_type, CONTENT_LENGTH, CONTENT_TYPE, MIME_TYPES};
use tandem_core::{Envelope, Error, Id, IdSlot, Result, Server, Transport, VERSION};

/// Maximum accepted request body size (10 MB).
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Type alias for the responses this middleware produces.
pub type HttpResponse = Response<Full<Bytes>>;

/// JSON-RPC middleware over HTTP.
///
/// One inbound HTTP request is one protocol exchange: the body must be a
/// single envelope, announced by `Content-Length` and an acceptable
/// `Content-Type`; the answer (if the request was not a notification)
/// comes back in the response body.
#[derive(Clone)]
pub struct HttpServer {
    server: Arc<Server>,
}

impl HttpServer {
    /// Wraps a dispatch core into HTTP middleware.
    pub fn new(server: Arc<Server>) -> Self {
        HttpServer { server }
    }

    /// Handles one HTTP exchange.
    ///
    /// Suitable as the body of a hyper `service_fn`. Carrier-level
    /// failures answer with plain HTTP status codes; protocol-level
    /// failures travel as JSON-RPC error envelopes in a `200` response.
    pub async fn handle<B>(&self, request: Request<B>) -> HttpResponse
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if validate_content_type(content_type).is_err() {
            return status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }

        let Some(length) = request.headers().get(CONTENT_LENGTH) else {
            return status_only(StatusCode::LENGTH_REQUIRED);
        };
        let Ok(length) = length.to_str().unwrap_or_default().parse::<usize>() else {
            return status_only(StatusCode::BAD_REQUEST);
        };
        if length > MAX_BODY_SIZE {
            return status_only(StatusCode::PAYLOAD_TOO_LARGE);
        }

        let body = match request.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read http body");
                return status_only(StatusCode::BAD_REQUEST);
            }
        };
        if body.len() < length {
            return status_only(StatusCode::BAD_REQUEST);
        }
        let body = body.slice(..length);

        let exchange = ExchangeTransport::new(body);
        if let Err(err) = self.server.serve_once(&exchange).await {
            tracing::warn!(error = %err, "http exchange failed");
        }

        match exchange.into_response() {
            Some(payload) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, MIME_TYPES[0])
                .header(CONTENT_LENGTH, payload.len())
                .body(Full::new(Bytes::from(payload)))
                .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR)),
            None => status_only(StatusCode::OK),
        }
    }

    /// Binds `addr` and serves HTTP/1.1 connections until an accept
    /// error occurs.
    pub async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "http server listening");
        self.serve_listener(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let middleware = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |request| {
                    let middleware = middleware.clone();
                    async move {
                        Ok::<_, std::convert::Infallible>(middleware.handle(request).await)
                    }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::warn!(error = %err, "http connection error");
                }
            });
        }
    }
}

fn status_only(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// A transport that lives for exactly one HTTP exchange: one envelope
/// in, at most one envelope out.
struct ExchangeTransport {
    inbound: Mutex<Option<Bytes>>,
    outbound: Mutex<Option<Vec<u8>>>,
}

impl ExchangeTransport {
    fn new(body: Bytes) -> Self {
        ExchangeTransport {
            inbound: Mutex::new(Some(body)),
            outbound: Mutex::new(None),
        }
    }

    fn into_response(self) -> Option<Vec<u8>> {
        self.outbound.into_inner().unwrap()
    }
}

#[async_trait::async_trait]
impl Transport for ExchangeTransport {
    async fn read(&self) -> Result<Envelope> {
        let Some(body) = self.inbound.lock().unwrap().take() else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "exchange already consumed",
            )));
        };
        Ok(serde_json::from_slice(&body)?)
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        *self.outbound.lock().unwrap() = Some(serde_json::to_vec(envelope)?);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON-RPC client over HTTP.
///
/// Identifiers are a process-local integer sequence; each call posts one
/// envelope and decodes the response body.
pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    seq: AtomicI64,
}

impl HttpClient {
    /// Creates a client for the endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        HttpClient {
            url: url.into(),
            http: reqwest::Client::new(),
            seq: AtomicI64::new(0),
        }
    }

    /// Sends a notification; the response body is ignored.
    pub async fn notify<P>(&self, method: &str, params: Option<&P>) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.exchange(true, method, params).await.map(|_| ())
    }

    /// Calls `method` and decodes the result into `R`.
    ///
    /// An error object in the response surfaces as
    /// [`Error::Rpc`](tandem_core::Error::Rpc).
    pub async fn send<P, R>(&self, method: &str, params: Option<&P>) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned + Default,
    {
        let response = self.exchange(false, method, params).await?;
        match response.and_then(|envelope| envelope.result) {
            Some(result) => Ok(serde_json::from_str(result.get())?),
            None => Ok(R::default()),
        }
    }

    async fn exchange<P>(
        &self,
        notify: bool,
        method: &str,
        params: Option<&P>,
    ) -> Result<Option<Envelope>>
    where
        P: Serialize + ?Sized,
    {
        let params = params.map(serde_json::value::to_raw_value).transpose()?;
        let request = Envelope {
            version: VERSION.to_string(),
            id: if notify {
                IdSlot::Absent
            } else {
                IdSlot::Id(Id::Number(self.seq.fetch_add(1, Ordering::Relaxed)))
            },
            method: method.to_string(),
            params,
            ..Envelope::default()
        };

        let body = serde_json::to_vec(&request)?;
        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, MIME_TYPES[0])
            .body(body)
            .send()
            .await
            .map_err(into_io)?;
        let payload = response.bytes().await.map_err(into_io)?;

        if notify {
            return Ok(None);
        }

        let envelope: Envelope = serde_json::from_slice(&payload)?;
        if let Some(error) = envelope.error {
            return Err(Error::Rpc(error));
        }
        Ok(Some(envelope))
    }
}

fn into_io(err: reqwest::Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
}
