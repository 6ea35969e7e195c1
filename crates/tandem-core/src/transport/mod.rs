//! Transport layer: moving one envelope at a time.
//!
//! The dispatch engine is transport-agnostic. Anything that can block
//! until the next [`Envelope`] arrives, emit one, and release its
//! resources can drive a connection: a byte stream with or without
//! header framing ([`StreamTransport`]), a datagram socket
//! ([`UdpTransport`]), a WebSocket, or a single HTTP exchange.
//!
//! # Contract
//!
//! - `read` blocks until the next envelope decodes, and may return the
//!   [`Error::Deadline`](crate::protocol::Error::Deadline) sentinel,
//!   which the serve loop treats as "no input, retry".
//! - `write` serializes concurrent callers internally; any dispatch task
//!   may write at any time.
//! - `close` is idempotent.
//!
//! # Media Types
//!
//! Header-framed transports negotiate content types. The accepted set is
//! [`MIME_TYPES`]; output always uses the first entry with a `utf-8`
//! charset.

use async_trait::async_trait;

use crate::protocol::envelope::Envelope;
use crate::protocol::error::{Error, Result};

pub mod stream;
pub mod udp;

pub use stream::StreamTransport;
pub use udp::UdpTransport;

/// Canonical name of the length header.
pub const CONTENT_LENGTH: &str = "Content-Length";
/// Canonical name of the media type header.
pub const CONTENT_TYPE: &str = "Content-Type";
/// The only charset accepted (and emitted) by framed transports.
pub const CHARSET: &str = "utf-8";
/// Accepted media types; output uses the first entry.
pub const MIME_TYPES: [&str; 3] = [
    "application/json",
    "application/json-rpc",
    "application/jsonrequest",
];

/// Reads and writes one envelope at a time over some medium.
///
/// Implementations serialize reads and writes internally, so a transport
/// shared behind an `Arc` supports one serve loop reading while any
/// number of dispatch tasks write.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Blocks until the next envelope arrives and decodes it.
    async fn read(&self) -> Result<Envelope>;

    /// Serializes and emits one envelope.
    async fn write(&self, envelope: &Envelope) -> Result<()>;

    /// Releases the underlying resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Validates a `Content-Type` header value.
///
/// An empty value passes (the header is optional). Otherwise the media
/// type must be one of [`MIME_TYPES`] and, when a `charset` parameter is
/// given, it must be `utf-8`. Matching is case-insensitive.
pub fn validate_content_type(header: &str) -> Result<()> {
    if header.is_empty() {
        return Ok(());
    }

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim();
    if !MIME_TYPES.iter().any(|accepted| mime.eq_ignore_ascii_case(accepted)) {
        return Err(Error::InvalidContentType(header.to_string()));
    }

    for parameter in parts {
        if let Some((name, value)) = parameter.split_once('=') {
            if name.trim().eq_ignore_ascii_case("charset")
                && !value.trim().eq_ignore_ascii_case(CHARSET)
            {
                return Err(Error::InvalidContentType(header.to_string()));
            }
        }
    }

    Ok(())
}
