//! JSON-RPC 2.0 Message Envelope
//!
//! This module defines the single wire structure shared by requests,
//! responses and notifications, together with the polymorphic request
//! identifier.
//!
//! # Wire Format
//!
//! All traffic is JSON objects of the following shape:
//!
//! - Request: `{"jsonrpc": "2.0", "id": ..., "method": "...", "params": ...}`
//! - Notification: `{"jsonrpc": "2.0", "method": "...", "params": ...}`
//! - Success: `{"jsonrpc": "2.0", "id": ..., "result": ...}`
//! - Failure: `{"jsonrpc": "2.0", "id": ..., "error": {...}}`
//!
//! The `id` member is either a signed 64-bit integer or a string,
//! serialized without any tag. A notification carries no `id` at all.
//!
//! # Example
//!
//! ```
//! use tandem_core::protocol::envelope::{Envelope, Id, VERSION};
//!
//! let req: Envelope = serde_json::from_str(
//!     r#"{"jsonrpc":"2.0","id":7,"method":"sum","params":[1,2]}"#,
//! ).unwrap();
//! assert!(req.is_request());
//! assert_eq!(req.id.as_id(), Some(&Id::Number(7)));
//! assert_eq!(req.version, VERSION);
//! ```

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::protocol::error::ErrorObject;

/// The protocol version carried in every envelope's `jsonrpc` member.
pub const VERSION: &str = "2.0";

/// A request identifier: a signed 64-bit integer or a string.
///
/// Serialization is value-only (a bare number or a bare JSON string).
/// Deserialization prefers the integer interpretation and falls back to
/// string, so `7` decodes as [`Id::Number`] and `"7"` as [`Id::Text`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier.
    Number(i64),
    /// String identifier.
    Text(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::Text(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::Text(s)
    }
}

/// The three states of an envelope's `id` member.
///
/// - [`IdSlot::Absent`]: the member is not present on the wire. This is
///   what marks an inbound request as a notification.
/// - [`IdSlot::Null`]: the member is written as JSON `null`. Only ever
///   produced locally, on synthesized error responses for requests whose
///   identifier could not be recovered (for example a parse failure).
/// - [`IdSlot::Id`]: a concrete identifier.
///
/// Inbound `"id": null` decodes as [`IdSlot::Absent`]; the peer that sent
/// it gets notification semantics, which is the closest reading the
/// protocol allows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdSlot {
    /// No `id` member on the wire.
    #[default]
    Absent,
    /// `"id": null`, written on error responses with no usable identifier.
    Null,
    /// A concrete identifier.
    Id(Id),
}

impl IdSlot {
    /// The identifier, if one is present.
    pub fn as_id(&self) -> Option<&Id> {
        match self {
            IdSlot::Id(id) => Some(id),
            IdSlot::Absent | IdSlot::Null => None,
        }
    }

    /// True when the member should be omitted from serialization.
    pub fn is_absent(&self) -> bool {
        matches!(self, IdSlot::Absent)
    }
}

impl From<Id> for IdSlot {
    fn from(id: Id) -> Self {
        IdSlot::Id(id)
    }
}

impl Serialize for IdSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IdSlot::Id(id) => id.serialize(serializer),
            IdSlot::Absent | IdSlot::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for IdSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Id>::deserialize(deserializer)? {
            Some(id) => Ok(IdSlot::Id(id)),
            None => Ok(IdSlot::Absent),
        }
    }
}

/// The single message type carrying both directions of the protocol.
///
/// Exactly one of `{method, params}`, `result`, or `error` is meaningful
/// per envelope:
///
/// - a **request** has a non-empty `method` (and is a **notification**
///   when `id` is absent);
/// - a **success response** has `result` and no `error`;
/// - a **failure response** has `error` and no `result`.
///
/// `params` and `result` are kept as opaque JSON fragments
/// ([`RawValue`]); the handler registry decodes them into typed values at
/// the last possible moment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version, [`VERSION`] on every message this runtime emits.
    #[serde(rename = "jsonrpc", default)]
    pub version: String,

    /// Request identifier; absent on notifications.
    #[serde(default, skip_serializing_if = "IdSlot::is_absent")]
    pub id: IdSlot,

    /// Method name; non-empty on requests, absent on responses.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,

    /// Call parameters, an opaque JSON fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,

    /// Call result; present iff the response is successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,

    /// Error object; present iff the response failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Envelope {
    /// Builds a success response carrying `id` and the encoded result.
    pub fn success(id: IdSlot, result: Box<RawValue>) -> Self {
        Envelope {
            version: VERSION.to_string(),
            id,
            result: Some(result),
            ..Envelope::default()
        }
    }

    /// Builds a failure response carrying `id` and the error object.
    pub fn failure(id: IdSlot, error: ErrorObject) -> Self {
        Envelope {
            version: VERSION.to_string(),
            id,
            error: Some(error),
            ..Envelope::default()
        }
    }

    /// True when this envelope is a request: `method` is non-empty or
    /// `params` is present.
    pub fn is_request(&self) -> bool {
        !self.method.is_empty() || self.params.is_some()
    }

    /// True when this envelope is a notification: a request with no
    /// identifier.
    pub fn is_notification(&self) -> bool {
        self.is_request() && self.id.as_id().is_none()
    }

    /// True when every protocol-relevant member is missing.
    ///
    /// Inputs that parsed as JSON but carry no version, id, method or
    /// params are rejected as invalid requests by the dispatch core.
    pub fn is_empty(&self) -> bool {
        self.version.is_empty()
            && self.id.as_id().is_none()
            && self.method.is_empty()
            && self.params.is_none()
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        fn text(fragment: &Option<Box<RawValue>>) -> Option<&str> {
            fragment.as_deref().map(RawValue::get)
        }

        self.version == other.version
            && self.id == other.id
            && self.method == other.method
            && text(&self.params) == text(&other.params)
            && text(&self.result) == text(&other.result)
            && self.error == other.error
    }
}
