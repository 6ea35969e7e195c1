//! Protocol definitions: the message envelope, the request identifier
//! and the error taxonomy.
//!
//! Everything here is transport-independent. The [`envelope`] module
//! holds the single wire structure shared by both directions of a
//! connection; the [`error`] module holds the wire error object and the
//! crate-wide [`Error`](error::Error) enum.

pub mod envelope;
pub mod error;

pub use envelope::{Envelope, Id, IdSlot, VERSION};
pub use error::{
    Error, ErrorObject, Result, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
