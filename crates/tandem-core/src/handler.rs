//! Typed method handlers and response callbacks.
//!
//! The registration combinators here turn a typed user function into a
//! type-erased descriptor the dispatch core can store and invoke.
//! Parameter and result shapes and the error-returning contract are
//! enforced by the trait bounds on [`Handler::new`] and
//! [`Callback::new`], so a function that registers at all is a function
//! the engine can call.
//!
//! A handler is a server-side callable bound to a method name:
//!
//! ```
//! use tandem_core::{Handler, Result};
//!
//! let double = Handler::new(|_notify, input: &i64, output: &mut i64| -> Result<()> {
//!     *output = *input * 2;
//!     Ok(())
//! });
//! # let _ = double;
//! ```
//!
//! A callback is the client-side consumer of one response, registered
//! under the outbound request's identifier and invoked at most once.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::protocol::envelope::Envelope;
use crate::protocol::error::{Error, ErrorObject, Result, INTERNAL_ERROR, PARSE_ERROR};

type HandlerFn = dyn Fn(bool, Option<&RawValue>) -> Result<Option<Box<RawValue>>> + Send + Sync;
type CallbackFn = dyn FnOnce(Option<&RawValue>) -> Result<()> + Send;

/// A type-erased method handler.
///
/// Holds the decode/invoke/encode pipeline for one registered
/// method. Built through [`Handler::new`] from any
/// `Fn(bool, &P, &mut R) -> Result<()>` where `P` and `R` are plain
/// serde data shapes.
pub struct Handler {
    f: Box<HandlerFn>,
}

impl Handler {
    /// Wraps a typed function into an erased descriptor.
    ///
    /// `P` is the parameter shape the inbound `params` fragment decodes
    /// into; `R` is the result shape encoded back out. Both start from
    /// their `Default` values, mirroring a fresh allocation: a request
    /// without `params` invokes the function with `P::default()`.
    ///
    /// The `bool` argument tells the function whether the request is a
    /// notification, in which case anything written to `R` is discarded.
    pub fn new<P, R, F>(f: F) -> Self
    where
        P: DeserializeOwned + Default + 'static,
        R: Serialize + Default + 'static,
        F: Fn(bool, &P, &mut R) -> Result<()> + Send + Sync + 'static,
    {
        Handler {
            f: Box::new(move |notify, params| {
                let mut input = P::default();
                if let Some(raw) = params {
                    input = serde_json::from_str(raw.get())
                        .map_err(|err| Error::Rpc(ErrorObject::new(PARSE_ERROR, err.to_string())))?;
                }

                let mut output = R::default();
                match f(notify, &input, &mut output) {
                    Ok(()) => {}
                    Err(Error::Rpc(object)) => return Err(Error::Rpc(object)),
                    Err(other) => {
                        return Err(Error::Rpc(ErrorObject::new(INTERNAL_ERROR, other.to_string())))
                    }
                }

                if notify {
                    return Ok(None);
                }

                let raw = serde_json::value::to_raw_value(&output)
                    .map_err(|err| Error::Rpc(ErrorObject::new(PARSE_ERROR, err.to_string())))?;
                Ok(Some(raw))
            }),
        }
    }

    /// Runs the handler against a request envelope.
    ///
    /// Returns the success envelope to write back, or `None` for a
    /// notification. Every error out of here is structured
    /// ([`Error::Rpc`]): a structured handler error verbatim, a plain
    /// one wrapped under [`INTERNAL_ERROR`], decode and encode failures
    /// under [`PARSE_ERROR`].
    pub(crate) fn call(&self, request: &Envelope) -> Result<Option<Envelope>> {
        let notify = request.id.as_id().is_none();
        match (self.f)(notify, request.params.as_deref())? {
            None => Ok(None),
            Some(result) => Ok(Some(Envelope::success(request.id.clone(), result))),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// A one-shot consumer for the response to an outbound call.
pub(crate) struct Callback {
    f: Box<CallbackFn>,
}

impl Callback {
    /// Wraps a typed consumer into an erased descriptor.
    ///
    /// The response's `result` fragment decodes into `R`
    /// (`R::default()` when absent) before the consumer runs.
    pub(crate) fn new<R, F>(f: F) -> Self
    where
        R: DeserializeOwned + Default + 'static,
        F: FnOnce(&R) -> Result<()> + Send + 'static,
    {
        Callback {
            f: Box::new(move |raw| {
                let mut result = R::default();
                if let Some(raw) = raw {
                    result = serde_json::from_str(raw.get())?;
                }
                f(&result)
            }),
        }
    }

    /// Consumes the callback against a response envelope.
    ///
    /// A response carrying an error object never reaches the consumer;
    /// the error comes back to the caller instead.
    pub(crate) fn call(self, response: &Envelope) -> Result<()> {
        if let Some(error) = &response.error {
            return Err(Error::Rpc(error.clone()));
        }
        (self.f)(response.result.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::{Id, IdSlot, VERSION};
    use crate::protocol::error::{INVALID_PARAMS, METHOD_NOT_FOUND};

    fn request(params: Option<&str>, notify: bool) -> Envelope {
        Envelope {
            version: VERSION.into(),
            id: if notify { IdSlot::Absent } else { IdSlot::Id(Id::Number(1)) },
            method: "f1".into(),
            params: params.map(|p| RawValue::from_string(p.to_string()).unwrap()),
            ..Envelope::default()
        }
    }

    #[test]
    fn test_call_increments() {
        let h = Handler::new(|_notify, input: &i64, output: &mut i64| {
            *output = *input + 1;
            Ok(())
        });
        let response = h.call(&request(Some("5"), false)).unwrap().unwrap();
        assert_eq!(response.result.unwrap().get(), "6");
        assert_eq!(response.id.as_id(), Some(&Id::Number(1)));
    }

    #[test]
    fn test_call_without_params_uses_defaults() {
        let h = Handler::new(|_notify, _input: &i64, output: &mut i64| {
            *output = 9;
            Ok(())
        });
        let response = h.call(&request(None, false)).unwrap().unwrap();
        assert_eq!(response.result.unwrap().get(), "9");
    }

    #[test]
    fn test_plain_error_wraps_as_internal() {
        let h = Handler::new(|_notify, _input: &i64, _output: &mut i64| {
            Err(Error::handler("error"))
        });
        match h.call(&request(Some("5"), false)) {
            Err(Error::Rpc(object)) => {
                assert_eq!(object.code, INTERNAL_ERROR);
                assert_eq!(object.message, "error");
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_structured_error_passes_through() {
        let h = Handler::new(|_notify, _input: &i64, _output: &mut i64| {
            Err(Error::rpc(METHOD_NOT_FOUND, "not found"))
        });
        match h.call(&request(Some("5"), false)) {
            Err(Error::Rpc(object)) => assert_eq!(object.code, METHOD_NOT_FOUND),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_undecodable_params_is_parse_error() {
        let h = Handler::new(|_notify, _input: &i64, _output: &mut i64| Ok(()));
        match h.call(&request(Some(r#""text""#), false)) {
            Err(Error::Rpc(object)) => assert_eq!(object.code, PARSE_ERROR),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_notification_produces_no_response() {
        let h = Handler::new(|notify, _input: &i64, output: &mut i64| {
            assert!(notify);
            *output = 42;
            Ok(())
        });
        assert!(h.call(&request(Some("5"), true)).unwrap().is_none());
    }

    #[test]
    fn test_callback_consumes_result() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(0i64));
        let inner = seen.clone();
        let cb = Callback::new(move |result: &i64| {
            *inner.lock().unwrap() = *result;
            Ok(())
        });

        let response = Envelope::success(
            IdSlot::Id(Id::Number(1)),
            serde_json::value::to_raw_value(&-1i64).unwrap(),
        );
        cb.call(&response).unwrap();
        assert_eq!(*seen.lock().unwrap(), -1);
    }

    #[test]
    fn test_callback_defaults_on_missing_result() {
        let cb = Callback::new(|result: &i64| {
            assert_eq!(*result, 0);
            Ok(())
        });
        cb.call(&Envelope::default()).unwrap();
    }

    #[test]
    fn test_callback_never_sees_error_responses() {
        let cb = Callback::new(|_result: &i64| panic!("must not run"));
        let response = Envelope::failure(
            IdSlot::Id(Id::Number(1)),
            ErrorObject::new(INVALID_PARAMS, "bad"),
        );
        match cb.call(&response) {
            Err(Error::Rpc(object)) => assert_eq!(object.code, INVALID_PARAMS),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_callback_undecodable_result_errors() {
        let cb = Callback::new(|_result: &i64| Ok(()));
        let response = Envelope::success(
            IdSlot::Id(Id::Number(1)),
            RawValue::from_string(r#""str""#.to_string()).unwrap(),
        );
        assert!(matches!(cb.call(&response), Err(Error::Json(_))));
    }

    #[test]
    fn test_callback_error_surfaces() {
        let cb = Callback::new(|_result: &i64| Err(Error::handler("test")));
        let response = Envelope::success(
            IdSlot::Id(Id::Number(1)),
            serde_json::value::to_raw_value(&-1i64).unwrap(),
        );
        assert!(cb.call(&response).is_err());
    }
}
