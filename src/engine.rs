//! The dispatcher: owns the method trees, fallback handlers, and the
//! context pool, and implements the hit/redirect/405/404 dispatch
//! algorithm.
//!
//! Grounded on the three-way branch in
//! `examples/HFQR-xitca-web/http/src/util/service/router.rs`'s
//! `RouterError` (`Match`/`NotAllowed`/`Service`) for the match/fallback
//! split, and on `examples/HFQR-xitca-web/server/src/worker/mod.rs` for the
//! `tracing`-at-each-branch discipline reused here at `debug` level.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use parking_lot::Mutex;

use crate::config::{resolve_addr, Config, ConfigError};
use crate::context::Context;
use crate::error::InsertError;
use crate::group::RouterGroup;
use crate::handler::{Handler, HandlerChain};
use crate::methods::MethodTrees;
use crate::params::Params;
use crate::path;
use crate::pool::Pool;

struct EngineState {
    trees: MethodTrees,
    no_route: HandlerChain,
    no_method: HandlerChain,
    root_handlers: Vec<Handler>,
    config: Config,
    pool: Pool,
    max_params: usize,
    max_sections: usize,
}

/// The request entry point: owns the route trees, the context pool, and
/// dispatch configuration.
///
/// Cheap to clone — an `Engine` is a handle (`Arc<Mutex<EngineState>>`)
/// rather than the state itself, so [`crate::group::RouterGroup`] and the
/// transport loop can each hold an owned copy without borrowing across
/// threads. Route registration is expected to complete before the first
/// `serve_http` call (§5); the lock exists for the handle's `Clone`
/// ergonomics, not to make concurrent registration a supported use case.
#[derive(Clone)]
pub struct Engine(Arc<Mutex<EngineState>>);

impl Engine {
    /// An engine with the reference framework's default dispatch flags
    /// (trailing-slash redirect, fixed-path redirect, and
    /// method-not-allowed all on) and no middleware.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(EngineState {
            trees: MethodTrees::new(),
            no_route: HandlerChain::from(vec![Handler::new(default_no_route)]),
            no_method: HandlerChain::from(vec![Handler::new(default_no_method)]),
            root_handlers: Vec::new(),
            config: Config::new(),
            pool: Pool::new(),
            max_params: 0,
            max_sections: 1,
        })))
    }

    /// [`Engine::new`] plus the default request logger and panic-recovery
    /// middleware, in that order.
    pub fn default_with_middleware() -> Self {
        let engine = Self::new();
        engine.use_middleware(Handler::new(logger_middleware));
        engine.use_middleware(Handler::new(recovery_middleware));
        engine
    }

    /// Appends `handler` to the engine's root middleware, applied to every
    /// route registered afterward (directly on the engine or through a
    /// [`RouterGroup`] created afterward).
    pub fn use_middleware(&self, handler: impl Into<Handler>) -> &Self {
        self.0.lock().root_handlers.push(handler.into());
        self
    }

    /// Creates a [`RouterGroup`] rooted at `relative_path`, inheriting the
    /// engine's current root middleware.
    pub fn group(&self, relative_path: &str) -> RouterGroup {
        let state = self.0.lock();
        RouterGroup::new(self.clone(), path::join_paths("/", relative_path), state.root_handlers.clone())
    }

    /// Replaces the handler chain run when no route matches (the 404
    /// fallback).
    pub fn no_route(&self, handlers: Vec<Handler>) {
        self.0.lock().no_route = HandlerChain::from(handlers);
    }

    /// Replaces the handler chain run when the path matches under a
    /// different method (the 405 fallback).
    pub fn no_method(&self, handlers: Vec<Handler>) {
        self.0.lock().no_method = HandlerChain::from(handlers);
    }

    pub fn get(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::GET, relative_path, handlers)
    }

    pub fn post(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::POST, relative_path, handlers)
    }

    pub fn put(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::PUT, relative_path, handlers)
    }

    pub fn delete(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::DELETE, relative_path, handlers)
    }

    pub fn patch(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::PATCH, relative_path, handlers)
    }

    pub fn options(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::OPTIONS, relative_path, handlers)
    }

    pub fn head(&self, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        self.handle(Method::HEAD, relative_path, handlers)
    }

    fn handle(&self, method: Method, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        let full_path = path::join_paths("/", relative_path);
        let root_handlers = self.0.lock().root_handlers.clone();
        self.register(method, &full_path, &root_handlers, &handlers)
    }

    /// Combines `group_handlers` and `route_handlers` and registers the
    /// result under `method`/`full_path`. Used both by the engine's own
    /// per-method shortcuts and by [`RouterGroup`].
    pub(crate) fn register(&self, method: Method, full_path: &str, group_handlers: &[Handler], route_handlers: &[Handler]) -> Result<(), InsertError> {
        let combined = HandlerChain::combine(group_handlers, route_handlers)?;
        let mut state = self.0.lock();
        state.trees.insert(method.clone(), full_path, combined)?;
        state.max_params = state.max_params.max(path::count_params(full_path));
        state.max_sections = state.max_sections.max(path::count_sections(full_path));
        tracing::debug!(%method, path = full_path, "route registered");
        Ok(())
    }

    /// Sets the engine's trusted proxy CIDRs (see [`Config::set_trusted_proxies`]).
    pub fn set_trusted_proxies<I, S>(&self, cidrs: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.0.lock().config.set_trusted_proxies(cidrs)
    }

    /// Mutates the engine's dispatch configuration in place.
    pub fn configure(&self, f: impl FnOnce(&mut Config)) {
        f(&mut self.0.lock().config)
    }

    /// Dispatches a single request: selects the tree, runs the matched
    /// handler chain, or falls back through the tsr-redirect /
    /// fixed-path-redirect / 405 / 404 chain (§4.4).
    pub fn serve_http(&self, request: http::Request<Bytes>, writer: Box<dyn std::io::Write + Send>) {
        let method = request.method().clone();
        let config = self.0.lock().config.clone();

        let raw_path = request.uri().path().to_string();
        // §6 UseRawPath: `http::Uri::path()` never decodes percent-escapes
        // itself (unlike Go's `net/url`, which decodes eagerly into
        // `URL.Path` and keeps the original in `URL.RawPath`), so matching
        // the reference behavior means decoding here ourselves when raw
        // lookup isn't requested — and, since the path is already decoded
        // in that case, bound param values must not be decoded a second
        // time regardless of `unescape_path_values`.
        let (decoded_path, unescape_values) = if config.use_raw_path {
            (raw_path, config.unescape_path_values)
        } else {
            let decoded = percent_encoding::percent_decode_str(&raw_path).decode_utf8().map(|c| c.into_owned()).unwrap_or(raw_path);
            (decoded, false)
        };
        let path = if config.remove_extra_slash { path::clean_path(&decoded_path) } else { decoded_path };

        let mut ctx = self.0.lock().pool.acquire();
        ctx.reset(request, Params::new(), HandlerChain::from(Vec::new()), writer);

        let (max_params, max_sections) = {
            let state = self.0.lock();
            (state.max_params, state.max_sections)
        };
        let outcome = self.0.lock().trees.at_with_capacity(&method, &path, unescape_values, max_params, max_sections);

        match outcome.handlers {
            Some(handlers) => {
                let handlers = handlers.clone();
                let full_path = outcome.full_path.to_string();
                tracing::debug!(%method, %path, full_path, branch = "hit");
                ctx.dispatch(handlers, outcome.params);
                let _ = ctx.writer().write_header_now();
            }
            None => self.handle_miss(&mut ctx, &method, &path, outcome.tsr, &config),
        }

        self.0.lock().pool.release(ctx);
    }

    fn handle_miss(&self, ctx: &mut Context, method: &Method, path: &str, tsr: bool, config: &Config) {
        if config.redirect_trailing_slash && tsr {
            let location = toggle_trailing_slash(path);
            tracing::debug!(%method, %path, location, branch = "tsr-redirect");
            redirect(ctx, method, &location);
            return;
        }

        if config.redirect_fixed_path {
            let cleaned = path::clean_path(path);
            let found = self.0.lock().trees.find_case_insensitive(method, &cleaned, true);
            if let Some(canonical) = found {
                tracing::debug!(%method, %path, canonical, branch = "fixed-path-redirect");
                redirect(ctx, method, &canonical);
                return;
            }
        }

        if config.handle_method_not_allowed {
            let allowed = self.0.lock().trees.allowed_methods(path, method);
            if !allowed.is_empty() {
                tracing::debug!(%method, %path, branch = "method-not-allowed");
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                ctx.writer().set_header("Allow", allow);
                let chain = self.0.lock().no_method.clone();
                ctx.dispatch(chain, Params::new());
                let _ = ctx.writer().write_header_now();
                return;
            }
        }

        tracing::debug!(%method, %path, branch = "no-route");
        let chain = self.0.lock().no_route.clone();
        ctx.dispatch(chain, Params::new());
        let _ = ctx.writer().write_header_now();
    }

    /// Binds a `TcpListener` and serves connections until the process is
    /// killed or the listener errors fatally (§4.11). `addr` follows
    /// [`crate::config::resolve_addr`]: zero or one address.
    pub fn run(&self, addr: &[SocketAddr]) -> std::io::Result<()> {
        let addr = resolve_addr(addr).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        crate::net::serve(self.clone(), addr)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn toggle_trailing_slash(path: &str) -> String {
    if let Some(stripped) = path.strip_suffix('/') {
        if stripped.is_empty() { "/".to_string() } else { stripped.to_string() }
    } else {
        format!("{path}/")
    }
}

fn redirect(ctx: &mut Context, method: &Method, location: &str) {
    let status = if *method == Method::GET { 301 } else { 307 };
    let prefix = ctx
        .headers()
        .get("x-forwarded-prefix")
        .and_then(|v| v.to_str().ok())
        .map(|raw| path::filter_safe_path_chars(&path::clean_path(raw)))
        .unwrap_or_default();
    ctx.writer().write_header(status);
    ctx.writer().set_header("Location", format!("{prefix}{location}"));
    let _ = ctx.writer().write_header_now();
}

fn default_no_route(ctx: &mut Context) {
    ctx.writer().write_header(404);
    ctx.writer().set_header("Content-Type", "text/plain");
    let _ = ctx.writer().write_str("404 page not found");
}

fn default_no_method(ctx: &mut Context) {
    ctx.writer().write_header(405);
    ctx.writer().set_header("Content-Type", "text/plain");
    let _ = ctx.writer().write_str("405 method not allowed");
}

/// Logs method, path, final status, and elapsed time once the rest of the
/// chain has run. Installed first by [`Engine::default_with_middleware`]
/// so it wraps every other middleware's timing.
fn logger_middleware(ctx: &mut Context) {
    let method = ctx.method().clone();
    let uri = ctx.uri().clone();
    let start = std::time::Instant::now();
    ctx.next();
    let status = ctx.writer().status();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    tracing::info!(%method, %uri, status, elapsed_ms, "request complete");
}

/// Catches a panic anywhere downstream, logs it with sensitive headers
/// excluded, and translates it into a 500 instead of tearing down the
/// worker thread.
fn recovery_middleware(ctx: &mut Context) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctx.next()));
    if let Err(payload) = outcome {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(panic = %message, "recovered from handler panic");
        ctx.abort();
        ctx.writer().write_header(500);
        let _ = ctx.writer().write_str("500 internal server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn request(method: Method, path: &str) -> Request<Bytes> {
        Request::builder().method(method).uri(path).body(Bytes::new()).unwrap()
    }

    fn written(buf: &std::sync::Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(buf.lock().clone()).unwrap()
    }

    fn writer() -> (Box<dyn std::io::Write + Send>, std::sync::Arc<Mutex<Vec<u8>>>) {
        struct Shared(std::sync::Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let buf = std::sync::Arc::new(Mutex::new(Vec::new()));
        (Box::new(Shared(buf.clone())), buf)
    }

    #[test]
    fn dispatches_registered_route() {
        let engine = Engine::new();
        engine
            .get(
                "/user/:name",
                vec![Handler::new(|ctx: &mut Context| {
                    let name = ctx.params().get("name").unwrap().to_string();
                    let _ = ctx.writer().write_str(&name);
                })],
            )
            .unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/user/alice"), w);
        assert!(written(&buf).contains("200 OK"));
        assert!(written(&buf).ends_with("alice"));
    }

    #[test]
    fn falls_back_to_404() {
        let engine = Engine::new();
        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/missing"), w);
        assert!(written(&buf).contains("404"));
    }

    #[test]
    fn method_mismatch_returns_405_with_allow_header() {
        let engine = Engine::new();
        engine.get("/x", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();
        engine.post("/x", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::PUT, "/x"), w);
        let out = written(&buf);
        assert!(out.contains("405"));
        assert!(out.contains("Allow: GET, POST"));
    }

    #[test]
    fn trailing_slash_miss_redirects() {
        let engine = Engine::new();
        engine.get("/a/b", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/a/b/"), w);
        let out = written(&buf);
        assert!(out.contains("301"));
        assert!(out.contains("Location: /a/b"));
    }

    #[test]
    fn case_insensitive_miss_redirects_to_canonical() {
        let engine = Engine::new();
        engine.get("/Search", vec![Handler::new(|_ctx: &mut Context| {})]).unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/search"), w);
        let out = written(&buf);
        assert!(out.contains("301"));
        assert!(out.contains("Location: /Search"));
    }

    #[test]
    fn use_raw_path_toggles_whether_lookup_decodes_percent_escapes() {
        let engine = Engine::new();
        engine.get("/café", vec![Handler::new(|ctx: &mut Context| { let _ = ctx.writer().write_str("ok"); })]).unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/caf%C3%A9"), w);
        assert!(written(&buf).contains("200"));

        engine.configure(|c| c.use_raw_path = true);
        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/caf%C3%A9"), w);
        assert!(written(&buf).contains("404"));
    }

    #[test]
    fn recovery_middleware_turns_panic_into_500() {
        let engine = Engine::default_with_middleware();
        engine
            .get("/boom", vec![Handler::new(|_ctx: &mut Context| panic!("kaboom"))])
            .unwrap();

        let (w, buf) = writer();
        engine.serve_http(request(Method::GET, "/boom"), w);
        assert!(written(&buf).contains("500"));
    }
}
