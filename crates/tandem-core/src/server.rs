//! Dispatch core: method table, matchers, hooks and request plumbing.
//!
//! A [`Server`] owns everything both ends of a connection share: the
//! exact-name method table, the ordered matcher list consulted on a
//! miss, the optional before-hook gating dispatch, the optional handler
//! for errors carried by inbound responses, and the injected source of
//! unique outbound request identifiers.
//!
//! Peers are symmetric: the same `Server` drives the server side of a
//! connection (dispatching inbound requests) and the client side
//! (minting requests for [`Connection::send`](crate::Connection::send)).
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use std::sync::Arc;
//! use tandem_core::{Result, Server};
//!
//! #[derive(Default, serde::Deserialize)]
//! struct Sum { a: i64, b: i64 }
//!
//! let seq = Arc::new(AtomicI64::new(0));
//! let server = Server::new(move || seq.fetch_add(1, Ordering::Relaxed).to_string());
//!
//! assert!(server.register("sum", |_notify, p: &Sum, out: &mut i64| -> Result<()> {
//!     *out = p.a + p.b;
//!     Ok(())
//! }));
//! assert!(server.exists("sum"));
//! assert!(!server.register("sum", |_n, _p: &Sum, _o: &mut i64| Ok(())));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::handler::Handler;
use crate::protocol::envelope::{Envelope, Id, IdSlot, VERSION};
use crate::protocol::error::{
    Error, ErrorObject, Result, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::transport::Transport;

type BeforeHook = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;
type InboundErrorHandler = Box<dyn Fn(&ErrorObject) + Send + Sync>;
type IdSource = Box<dyn Fn() -> String + Send + Sync>;

struct Matcher {
    matches: Box<dyn Fn(&str) -> bool + Send + Sync>,
    handler: Arc<Handler>,
}

/// The shared dispatch engine behind one or more connections.
pub struct Server {
    id_source: IdSource,
    methods: RwLock<HashMap<String, Arc<Handler>>>,
    matchers: RwLock<Vec<Matcher>>,
    before: RwLock<Option<BeforeHook>>,
    err_handler: RwLock<Option<InboundErrorHandler>>,
}

impl Server {
    /// Creates a server around a unique-ID source.
    ///
    /// `unique` mints the identifier of every outbound non-notification
    /// request and must not repeat over the server's lifetime.
    pub fn new(unique: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Server {
            id_source: Box::new(unique),
            methods: RwLock::new(HashMap::new()),
            matchers: RwLock::new(Vec::new()),
            before: RwLock::new(None),
            err_handler: RwLock::new(None),
        }
    }

    fn mint_id(&self) -> Id {
        Id::Text((self.id_source)())
    }

    /// Registers a typed handler under an exact method name.
    ///
    /// Returns `false` (leaving the existing entry intact) when the name
    /// is already taken.
    pub fn register<P, R, F>(&self, method: impl Into<String>, f: F) -> bool
    where
        P: serde::de::DeserializeOwned + Default + 'static,
        R: Serialize + Default + 'static,
        F: Fn(bool, &P, &mut R) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(method, Handler::new(f))
    }

    /// Registers an already-erased handler descriptor.
    pub fn register_handler(&self, method: impl Into<String>, handler: Handler) -> bool {
        let method = method.into();
        let mut methods = self.methods.write().unwrap();
        if methods.contains_key(&method) {
            return false;
        }
        methods.insert(method, Arc::new(handler));
        true
    }

    /// Registers several handlers at once, panicking on any duplicate
    /// name.
    pub fn register_handlers(&self, entries: impl IntoIterator<Item = (String, Handler)>) {
        for (method, handler) in entries {
            let registered = self.register_handler(method.clone(), handler);
            assert!(registered, "method already registered: {}", method);
        }
    }

    /// Registers a predicate-based handler.
    ///
    /// Matchers are consulted in registration order, and only when the
    /// exact-name table misses.
    pub fn register_matcher<M, P, R, F>(&self, matches: M, f: F)
    where
        M: Fn(&str) -> bool + Send + Sync + 'static,
        P: serde::de::DeserializeOwned + Default + 'static,
        R: Serialize + Default + 'static,
        F: Fn(bool, &P, &mut R) -> Result<()> + Send + Sync + 'static,
    {
        self.matchers.write().unwrap().push(Matcher {
            matches: Box::new(matches),
            handler: Arc::new(Handler::new(f)),
        });
    }

    /// True when an exact-name handler exists for `method`.
    pub fn exists(&self, method: &str) -> bool {
        self.methods.read().unwrap().contains_key(method)
    }

    /// Installs the pre-dispatch gate.
    ///
    /// The hook runs with the method name before lookup; an error vetoes
    /// the call and is written back under [`METHOD_NOT_FOUND`] (a
    /// structured error keeps its own code and payload). Repeated calls
    /// replace the hook.
    pub fn set_before(&self, f: impl Fn(&str) -> Result<()> + Send + Sync + 'static) {
        *self.before.write().unwrap() = Some(Box::new(f));
    }

    /// Installs the handler invoked when a peer's response carries an
    /// error object. Repeated calls replace the handler.
    pub fn set_err_handler(&self, f: impl Fn(&ErrorObject) + Send + Sync + 'static) {
        *self.err_handler.write().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn handle_inbound_error(&self, error: &ErrorObject) {
        if let Some(handler) = &*self.err_handler.read().unwrap() {
            handler(error);
        }
    }

    /// Reads one envelope on behalf of a serve loop.
    ///
    /// - `Ok(Some(envelope))`: input to dispatch.
    /// - `Ok(None)`: handled locally: the deadline sentinel, or a
    ///   malformed/empty payload already answered with an error
    ///   envelope.
    /// - `Err(_)`: framing failures (local, not reflected to the peer)
    ///   and I/O failures (fatal to the loop).
    pub(crate) async fn read(&self, transport: &dyn Transport) -> Result<Option<Envelope>> {
        let envelope = match transport.read().await {
            Ok(envelope) => envelope,
            Err(Error::Deadline) => return Ok(None),
            Err(err @ Error::Json(_)) => {
                self.write_error(transport, IdSlot::Null, PARSE_ERROR, err).await?;
                return Ok(None);
            }
            Err(Error::Rpc(object)) => {
                transport.write(&Envelope::failure(IdSlot::Null, object)).await?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if envelope.is_empty() {
            self.write_error(
                transport,
                IdSlot::Null,
                INVALID_REQUEST,
                Error::handler("invalid request"),
            )
            .await?;
            return Ok(None);
        }

        Ok(Some(envelope))
    }

    /// Dispatches one request envelope and writes the outcome.
    ///
    /// Notifications never produce output, whatever happens: a failed
    /// lookup, a vetoing hook or a handler error comes back to the
    /// caller (for logging) instead of the wire.
    pub(crate) async fn dispatch(&self, transport: &dyn Transport, request: &Envelope) -> Result<()> {
        let notify = request.id.as_id().is_none();

        let vetoed = {
            let before = self.before.read().unwrap();
            before.as_ref().map(|hook| hook(&request.method))
        };
        if let Some(Err(err)) = vetoed {
            if notify {
                return Err(err);
            }
            return self
                .write_error(transport, request.id.clone(), METHOD_NOT_FOUND, err)
                .await;
        }

        let handler = self.lookup(&request.method);
        let Some(handler) = handler else {
            let err = Error::handler(format!("no handler for method {}", request.method));
            if notify {
                return Err(err);
            }
            return self
                .write_error(transport, request.id.clone(), METHOD_NOT_FOUND, err)
                .await;
        };

        match handler.call(request) {
            Ok(None) => Ok(()),
            Ok(Some(response)) => transport.write(&response).await,
            Err(err) if notify => Err(err),
            Err(err) => {
                self.write_error(transport, request.id.clone(), PARSE_ERROR, err)
                    .await
            }
        }
    }

    fn lookup(&self, method: &str) -> Option<Arc<Handler>> {
        if let Some(handler) = self.methods.read().unwrap().get(method) {
            return Some(Arc::clone(handler));
        }
        let matchers = self.matchers.read().unwrap();
        matchers
            .iter()
            .find(|m| (m.matches)(method))
            .map(|m| Arc::clone(&m.handler))
    }

    /// Reads one envelope and answers it over the same transport.
    ///
    /// This is the single-exchange pipeline used by request/response
    /// collaborators such as the HTTP middleware, where a transport
    /// carries exactly one envelope in and at most one out.
    pub async fn serve_once(&self, transport: &dyn Transport) -> Result<()> {
        let Some(envelope) = self.read(transport).await? else {
            return Ok(());
        };
        if envelope.is_request() {
            self.dispatch(transport, &envelope).await
        } else {
            if let Some(error) = &envelope.error {
                self.handle_inbound_error(error);
            }
            Ok(())
        }
    }

    /// Builds an outbound request envelope, minting an identifier unless
    /// it is a notification.
    pub(crate) fn make_request<P>(
        &self,
        notify: bool,
        method: &str,
        params: Option<&P>,
    ) -> Result<Envelope>
    where
        P: Serialize + ?Sized,
    {
        let params = params
            .map(serde_json::value::to_raw_value)
            .transpose()?;
        Ok(Envelope {
            version: VERSION.to_string(),
            id: if notify { IdSlot::Absent } else { IdSlot::Id(self.mint_id()) },
            method: method.to_string(),
            params,
            ..Envelope::default()
        })
    }

    /// Builds and writes an outbound request, returning the envelope so
    /// the caller can index its callback table by the minted identifier.
    pub(crate) async fn request<P>(
        &self,
        transport: &dyn Transport,
        notify: bool,
        method: &str,
        params: Option<&P>,
    ) -> Result<Envelope>
    where
        P: Serialize + ?Sized,
    {
        let request = self.make_request(notify, method, params)?;
        transport.write(&request).await?;
        Ok(request)
    }

    async fn write_error(
        &self,
        transport: &dyn Transport,
        id: IdSlot,
        code: i32,
        err: Error,
    ) -> Result<()> {
        transport
            .write(&Envelope::failure(id, ErrorObject::from_error(code, err)))
            .await
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("methods", &self.methods.read().unwrap().len())
            .field("matchers", &self.matchers.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error::{INTERNAL_ERROR, INVALID_PARAMS};
    use serde::{Deserialize, Serialize};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct InType {
        #[serde(default)]
        last: String,
        #[serde(default)]
        first: String,
        #[serde(default, rename = "Age")]
        age: i64,
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct OutType {
        name: String,
        age: i64,
    }

    /// Scripted transport: hands out queued read outcomes and records
    /// writes.
    struct TestTransport {
        inbox: Mutex<VecDeque<Result<Envelope>>>,
        outbox: Mutex<Vec<Envelope>>,
    }

    impl TestTransport {
        fn new() -> Self {
            TestTransport {
                inbox: Mutex::new(VecDeque::new()),
                outbox: Mutex::new(Vec::new()),
            }
        }

        fn push_json(&self, payload: &str) {
            let outcome = serde_json::from_str::<Envelope>(payload).map_err(Error::from);
            self.inbox.lock().unwrap().push_back(outcome);
        }

        fn written(&self) -> Vec<Envelope> {
            self.outbox.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Transport for TestTransport {
        async fn read(&self) -> Result<Envelope> {
            self.inbox
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::Deadline))
        }

        async fn write(&self, envelope: &Envelope) -> Result<()> {
            self.outbox.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn f1(notify: bool, params: &InType, result: &mut OutType) -> Result<()> {
        if notify {
            return Ok(());
        }
        result.name = format!("{}{}", params.first, params.last);
        result.age = params.age;
        Ok(())
    }

    fn test_server() -> Server {
        let seq = AtomicI64::new(0);
        let server = Server::new(move || seq.fetch_add(1, Ordering::Relaxed).to_string());
        assert!(server.register("f1", f1));
        assert!(server.register("f2", |_n, _p: &InType, _r: &mut OutType| {
            Err(Error::rpc(INVALID_PARAMS, "invalid params"))
        }));
        assert!(server.register("f3", |_n, _p: &InType, _r: &mut OutType| {
            Err(Error::handler("boom"))
        }));
        assert!(!server.register("f3", f1));
        server.register_matcher(|method| method.starts_with("ok/"), f1);
        server
    }

    async fn dispatch_request(server: &Server, payload: &str) -> Vec<Envelope> {
        let transport = TestTransport::new();
        transport.push_json(payload);
        let envelope = server.read(&transport).await.unwrap().unwrap();
        server.dispatch(&transport, &envelope).await.unwrap();
        transport.written()
    }

    #[tokio::test]
    async fn test_read_malformed_json_answers_parse_error() {
        let server = test_server();
        let transport = TestTransport::new();
        transport.push_json(r#"{"jsonrpc""#);

        assert!(server.read(&transport).await.unwrap().is_none());
        let written = transport.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(written[0].id, IdSlot::Null);
    }

    #[tokio::test]
    async fn test_read_empty_envelope_answers_invalid_request() {
        let server = test_server();
        let transport = TestTransport::new();
        transport.push_json("{}");

        assert!(server.read(&transport).await.unwrap().is_none());
        let written = transport.written();
        assert_eq!(written[0].error.as_ref().unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_read_version_only_envelope_passes_through() {
        let server = test_server();
        let transport = TestTransport::new();
        transport.push_json(r#"{"jsonrpc":"2.0"}"#);

        assert!(server.read(&transport).await.unwrap().is_some());
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_read_deadline_is_no_work() {
        let server = test_server();
        let transport = TestTransport::new();
        assert!(server.read(&transport).await.unwrap().is_none());
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_round_trip() {
        let server = test_server();
        let written = dispatch_request(
            &server,
            r#"{"jsonrpc":"2.0","id":7,"method":"f1","params":{"Age":19,"last":"l","first":"F"}}"#,
        )
        .await;

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].id.as_id(), Some(&Id::Number(7)));
        assert!(written[0].error.is_none());
        let result: OutType =
            serde_json::from_str(written[0].result.as_deref().unwrap().get()).unwrap();
        assert_eq!(result, OutType { name: "Fl".into(), age: 19 });
    }

    #[tokio::test]
    async fn test_dispatch_without_params_uses_defaults() {
        let server = test_server();
        let written =
            dispatch_request(&server, r#"{"jsonrpc":"2.0","id":1,"method":"f1"}"#).await;
        let result: OutType =
            serde_json::from_str(written[0].result.as_deref().unwrap().get()).unwrap();
        assert_eq!(result.age, 0);
    }

    #[tokio::test]
    async fn test_dispatch_structured_handler_error() {
        let server = test_server();
        let written = dispatch_request(
            &server,
            r#"{"jsonrpc":"2.0","id":2,"method":"f2","params":{"Age":18}}"#,
        )
        .await;

        let error = written[0].error.as_ref().unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "invalid params");
        assert!(written[0].result.is_none());
        assert_eq!(written[0].id.as_id(), Some(&Id::Number(2)));
    }

    #[tokio::test]
    async fn test_dispatch_plain_handler_error_wraps_internal() {
        let server = test_server();
        let written = dispatch_request(
            &server,
            r#"{"jsonrpc":"2.0","id":3,"method":"f3","params":{"Age":18}}"#,
        )
        .await;

        let error = written[0].error.as_ref().unwrap();
        assert_eq!(error.code, INTERNAL_ERROR);
        assert_eq!(error.message, "boom");
    }

    #[tokio::test]
    async fn test_dispatch_method_miss() {
        let server = test_server();
        let written =
            dispatch_request(&server, r#"{"jsonrpc":"2.0","id":4,"method":"not-exists"}"#).await;

        let error = written[0].error.as_ref().unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(error.message.contains("not-exists"));
    }

    #[tokio::test]
    async fn test_dispatch_matcher_hit_and_near_miss() {
        let server = test_server();

        let written = dispatch_request(
            &server,
            r#"{"jsonrpc":"2.0","id":5,"method":"ok/anything","params":{"Age":18}}"#,
        )
        .await;
        assert!(written[0].error.is_none());

        let written =
            dispatch_request(&server, r#"{"jsonrpc":"2.0","id":6,"method":"ok_bad"}"#).await;
        assert_eq!(written[0].error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_before_hook_structured_veto_keeps_its_code() {
        let server = test_server();
        server.set_before(|method| {
            if method == "b2" {
                return Err(Error::rpc(-32111, "not found"));
            }
            if method == "b5" {
                return Err(Error::handler("f5"));
            }
            Ok(())
        });

        let written = dispatch_request(&server, r#"{"jsonrpc":"2.0","id":8,"method":"b2"}"#).await;
        assert_eq!(written[0].error.as_ref().unwrap().code, -32111);

        let written = dispatch_request(&server, r#"{"jsonrpc":"2.0","id":9,"method":"b5"}"#).await;
        assert_eq!(written[0].error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notification_never_answers() {
        let server = test_server();
        let transport = TestTransport::new();

        for payload in [
            r#"{"jsonrpc":"2.0","method":"f1","params":{"Age":18,"last":"","first":""}}"#,
            r#"{"jsonrpc":"2.0","method":"f2","params":{"Age":18}}"#,
            r#"{"jsonrpc":"2.0","method":"not-exists"}"#,
        ] {
            transport.push_json(payload);
            let envelope = server.read(&transport).await.unwrap().unwrap();
            // Failures surface to the caller instead of the wire.
            let _ = server.dispatch(&transport, &envelope).await;
        }

        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn test_outbound_request_mints_unique_ids() {
        let server = test_server();
        let transport = TestTransport::new();

        let first = server
            .request(&transport, false, "f1", Some(&InType::default()))
            .await
            .unwrap();
        let second = server.request::<InType>(&transport, false, "f1", None).await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(second.params.is_none());
        assert_eq!(transport.written().len(), 2);
    }

    #[tokio::test]
    async fn test_outbound_notification_has_no_id() {
        let server = test_server();
        let transport = TestTransport::new();
        let request = server
            .request(&transport, true, "f1", Some(&InType::default()))
            .await
            .unwrap();
        assert!(request.id.as_id().is_none());
    }

    #[test]
    fn test_register_handlers_panics_on_duplicate() {
        let server = test_server();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            server.register_handlers([("f1".to_string(), Handler::new(f1))]);
        }));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_register_handlers_accepts_fresh_names() {
        let server = test_server();
        server.register_handlers([
            ("g1".to_string(), Handler::new(f1)),
            ("g2".to_string(), Handler::new(f1)),
        ]);
        assert!(server.exists("g1") && server.exists("g2"));
    }

    #[tokio::test]
    async fn test_serve_once_answers_one_request() {
        let server = test_server();
        let transport = TestTransport::new();
        transport.push_json(r#"{"jsonrpc":"2.0","id":1,"method":"f1","params":{"Age":3}}"#);

        server.serve_once(&transport).await.unwrap();
        assert_eq!(transport.written().len(), 1);
    }

    #[tokio::test]
    async fn test_serve_once_routes_inbound_errors() {
        let server = test_server();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        server.set_err_handler(move |error| {
            *sink.lock().unwrap() = Some(error.code);
        });

        let transport = TestTransport::new();
        transport.push_json(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"x"}}"#);
        server.serve_once(&transport).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(-32000));
        assert!(transport.written().is_empty());
    }
}
