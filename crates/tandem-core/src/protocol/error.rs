//! Error taxonomy for the runtime.
//!
//! Two layers of errors exist:
//!
//! - [`ErrorObject`] is the JSON-RPC 2.0 `error` member that travels on
//!   the wire: an integer code, a short message and optional free-form
//!   data.
//! - [`Error`] is the crate-wide error enum. Handler code returns it,
//!   transports produce it, and the serve loop classifies it: protocol
//!   errors become error envelopes, framing errors are logged locally,
//!   I/O errors close the connection, and the deadline sentinel is
//!   silently absorbed.
//!
//! # Error Codes
//!
//! Standard JSON-RPC 2.0 error codes:
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The payload is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameter(s).
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;

/// The JSON-RPC 2.0 error object.
///
/// Carried inside failure envelopes. Handlers may return one wrapped in
/// [`Error::Rpc`] to put an exact code and payload on the wire; any other
/// handler error is wrapped under [`INTERNAL_ERROR`] by the dispatch
/// core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Integer error code.
    pub code: i32,
    /// Short description of the error.
    pub message: String,
    /// Additional data, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates an error object with no attached data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        ErrorObject {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates an error object carrying additional data.
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        ErrorObject {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Converts an [`Error`] into a wire error object.
    ///
    /// A structured [`Error::Rpc`] passes through verbatim, keeping its
    /// own code and data; anything else is stringified under `code`.
    pub fn from_error(code: i32, err: Error) -> Self {
        match err {
            Error::Rpc(object) => object,
            other => ErrorObject::new(code, other.to_string()),
        }
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ErrorObject {}

/// Crate-wide error type.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A structured protocol error; propagates verbatim into error
    /// envelopes.
    #[error("{0}")]
    Rpc(ErrorObject),

    /// JSON encode/decode failure; reflected to the peer as
    /// [`PARSE_ERROR`] when it concerns protocol payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O failure. Unrecoverable on reads: the serve loop
    /// closes the connection.
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Read deadline exceeded. The serve loop treats this as "no input,
    /// retry" rather than as a failure.
    #[error("read deadline exceeded")]
    Deadline,

    /// A header line that is not `Name: value`, or a Content-Length that
    /// is not a non-negative integer.
    #[error("invalid framing header: {0}")]
    InvalidHeader(String),

    /// A framed read whose header block carries no Content-Length.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A media type outside the accepted set, or a charset other than
    /// utf-8.
    #[error("invalid Content-Type: {0}")]
    InvalidContentType(String),

    /// The serve loop was cancelled; returned by `Connection::serve`.
    #[error("serve loop cancelled")]
    Cancelled,

    /// A plain, unstructured failure from handler or callback code;
    /// wrapped under [`INTERNAL_ERROR`] when it reaches the wire.
    #[error("{0}")]
    Handler(String),
}

impl Error {
    /// Shorthand for a structured protocol error.
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Error::Rpc(ErrorObject::new(code, message))
    }

    /// Shorthand for a plain handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// True for errors that should end the serve loop: generic I/O
    /// failures and cancellation. Everything else is iteration-local.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Error::Deadline,
            _ => Error::Io(err),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
