//! The per-request [`Context`]: bound params, the handler cursor, and the
//! per-request key/value and error bags.
//!
//! Pooled and reset between requests (see [`crate::pool::Pool`]) rather
//! than allocated fresh each time — `Params` and the skipped-node scratch
//! space are truncated back to empty instead of dropped, the same
//! discipline [`crate::params::Params::truncate`] documents.

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri};
use parking_lot::RwLock;

use crate::binding::{Binding, BindingBody};
use crate::error::Error;
use crate::handler::{HandlerChain, ABORT_INDEX};
use crate::params::Params;
use crate::render::Render;
use crate::writer::ResponseWriter;

/// Per-request state threaded through a [`HandlerChain`].
///
/// Mirrors the reference design's request context: handlers read the
/// request, write response state (left to [`crate::writer::ResponseWriter`]),
/// call [`Context::next`] to run downstream middleware, and may call
/// [`Context::abort`] to short-circuit the chain. Handlers that run code
/// after calling `next` form the "middleware sandwich" described in the
/// design notes — `next` returns once the rest of the chain (including the
/// route handler) has already run.
pub struct Context {
    request: Request<Bytes>,
    params: Params,
    handlers: HandlerChain,
    index: usize,
    keys: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    errors: Vec<Error>,
    writer: ResponseWriter,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            request: Request::new(Bytes::new()),
            params: Params::new(),
            handlers: HandlerChain::from(Vec::new()),
            index: 0,
            keys: RwLock::new(HashMap::new()),
            errors: Vec::new(),
            writer: ResponseWriter::empty(),
        }
    }

    /// Resets all per-request state for reuse from a [`crate::pool::Pool`].
    ///
    /// Drops the previous request's keys and errors outright (they're not
    /// reusable across requests) but keeps `params`' backing allocation via
    /// `truncate`.
    pub(crate) fn reset(&mut self, request: Request<Bytes>, params: Params, handlers: HandlerChain, writer: Box<dyn std::io::Write + Send>) {
        self.request = request;
        self.params = params;
        self.params.truncate(0);
        self.handlers = handlers;
        self.index = 0;
        self.keys.write().clear();
        self.errors.clear();
        self.writer.reset(writer);
    }

    /// Installs the handler chain and bound params a lookup produced, then
    /// runs the chain from the start. Used by [`crate::engine::Engine`]
    /// once route selection has happened, since the final chain isn't
    /// known at [`Context::reset`] time.
    pub(crate) fn dispatch(&mut self, handlers: HandlerChain, params: Params) {
        self.handlers = handlers;
        self.params = params;
        self.run();
    }

    /// The incoming request's method.
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// The incoming request's URI.
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// The incoming request's headers.
    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    /// The incoming request's raw body, as read off the wire by the
    /// transport loop (or supplied directly by an embedding driving
    /// [`crate::engine::Engine::serve_http`]).
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Bound route parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The response writer wrapper for this request.
    pub fn writer(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    /// Writes `code` as the status and `render`'s content type, then either
    /// calls [`Render::render`] to write the body or, for a status that
    /// never admits one (1xx, 204, 304 — RFC 7230 §3.3.3), terminates with
    /// headers only.
    pub fn render(&mut self, code: u16, render: &dyn Render) -> Result<(), Box<dyn StdError + Send + Sync>> {
        self.writer.write_header(code);
        render.write_content_type(&mut self.writer);
        if matches!(code, 100..=199 | 204 | 304) {
            let _ = self.writer.write_header_now();
            return Ok(());
        }
        render.render(&mut self.writer)
    }

    /// Binds the request into `destination` with an explicit `binding`,
    /// bypassing method/content-type selection.
    pub fn bind_with(&self, binding: &dyn Binding, destination: &mut dyn Any) -> Result<(), Box<dyn StdError + Send + Sync>> {
        binding.bind(&self.bodyless_request(), destination)
    }

    /// Selects a binding from `bindings` by request method and
    /// `Content-Type` (`GET`/`HEAD`/`DELETE` select `"query"`; other
    /// methods select `"json"` or `"form"` from the header, defaulting to
    /// `"json"`), then binds the request into `destination`.
    pub fn bind(&self, bindings: &[&dyn Binding], destination: &mut dyn Any) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let name = self.select_binding_name();
        let binding = bindings
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| -> Box<dyn StdError + Send + Sync> { format!("no binding registered for {name}").into() })?;
        binding.bind(&self.bodyless_request(), destination)
    }

    /// Binds the raw request body into `destination` with an explicit
    /// `binding`. The body itself lives in `self.request` as a cheaply
    /// cloned [`Bytes`], so unlike the reference design there is no
    /// separate buffering step to re-read it: [`Context::body`] already
    /// returns the same bytes every time.
    pub fn bind_body(&self, binding: &dyn BindingBody, destination: &mut dyn Any) -> Result<(), Box<dyn StdError + Send + Sync>> {
        binding.bind_body(self.body(), destination)
    }

    fn select_binding_name(&self) -> &'static str {
        match *self.method() {
            Method::GET | Method::HEAD | Method::DELETE => "query",
            _ => {
                let content_type = self.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");
                if content_type.starts_with("application/x-www-form-urlencoded") || content_type.starts_with("multipart/form-data") {
                    "form"
                } else {
                    "json"
                }
            }
        }
    }

    /// Projects the request's method/URI/headers onto a bodyless
    /// `Request<()>`, the shape [`Binding::bind`] reads (the body is
    /// reached separately through [`BindingBody::bind_body`]).
    fn bodyless_request(&self) -> Request<()> {
        let mut builder = Request::builder().method(self.method().clone()).uri(self.uri().clone());
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers().clone();
        }
        builder.body(()).expect("method/uri/headers copied from a valid request are always valid")
    }

    /// Runs the rest of the chain: advances past the current handler and
    /// loops, calling each remaining handler in turn, until the index runs
    /// off the end of the chain, [`Context::abort`] has set it to
    /// [`ABORT_INDEX`], or the peer is gone. `self.index` always holds the
    /// index of the next handler still to run, incremented just before
    /// that handler is called — so a handler that calls `next()` itself
    /// (the "middleware sandwich" pattern) drives the rest of the chain
    /// from inside that call, and when it returns the index is already
    /// past the end, making the resuming loop here a no-op. A handler that
    /// never calls `next()` doesn't stop the chain either: this loop just
    /// keeps going and runs the next one anyway, matching a route
    /// registered with multiple plain handlers all running in order.
    pub fn next(&mut self) {
        while self.index < self.handlers.len() && !self.writer.peer_gone() {
            let handler = match self.handlers.get(self.index) {
                Some(h) => h.clone(),
                None => break,
            };
            self.index += 1;
            handler.call(self);
        }
    }

    /// Prevents any handler after the current one from running, including
    /// ones skipped by a `next()` that hasn't returned yet.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    /// Returns `true` if [`Context::abort`] has been called during this
    /// request.
    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    pub(crate) fn run(&mut self) {
        self.index = 0;
        self.next();
    }

    /// Stores a value under `key`, retrievable later in the same request
    /// (and by other handlers further down the chain) via [`Context::get`].
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.keys.write().insert(key.into(), Arc::new(value));
    }

    /// Retrieves a value previously stored with [`Context::set`].
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.keys.read().get(key).and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// Appends an error to the request's accumulated error list. Errors
    /// are never thrown; handlers and recovery middleware inspect them via
    /// [`Context::errors`] or [`Context::errors_by_kind`].
    pub fn error(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// All accumulated errors, in the order they were appended.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Accumulated errors whose kind includes every bit of `kind`.
    pub fn errors_by_kind(&self, kind: crate::error::Kind) -> impl Iterator<Item = &Error> {
        self.errors.iter().filter(move |e| e.kind().contains(kind))
    }
}
