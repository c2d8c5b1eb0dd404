//! Composable route groups: a base path plus inherited middleware.
//!
//! Grounded on the general composition idiom of
//! `examples/HFQR-xitca-web/web/src/app/mod.rs` (`App`'s router-building
//! methods, each delegating to a shared insert path) and the
//! "compute absolute path, then delegate" shape of the `RouteGen`/`PathGen`
//! traits in `examples/HFQR-xitca-web/http/src/util/service/router.rs`.

use http::Method;

use crate::engine::Engine;
use crate::error::InsertError;
use crate::handler::Handler;
use crate::path::join_paths;

/// A base path and an inherited middleware chain, both prepended onto
/// routes registered through it.
///
/// `engine` is an owned clone of the [`Engine`] handle (itself
/// `Arc<Mutex<_>>`-backed) rather than a raw back-pointer — see
/// `DESIGN.md`'s Open Questions for why a shared-ownership handle was
/// chosen over the reference framework's embedded-pointer approach.
pub struct RouterGroup {
    base_path: String,
    handlers: Vec<Handler>,
    engine: Engine,
}

impl RouterGroup {
    pub(crate) fn new(engine: Engine, base_path: String, handlers: Vec<Handler>) -> Self {
        Self { base_path, handlers, engine }
    }

    /// The group's absolute base path.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Appends middleware to this group's chain, applied to every route
    /// registered through it afterward (and inherited by any further
    /// nested group).
    pub fn use_middleware(&mut self, handler: impl Into<Handler>) -> &mut Self {
        self.handlers.push(handler.into());
        self
    }

    /// Creates a nested group whose base path is `relative_path` joined
    /// onto this group's, and whose middleware is this group's middleware
    /// plus `middleware`.
    pub fn group(&self, relative_path: &str, middleware: Vec<Handler>) -> RouterGroup {
        let mut handlers = self.handlers.clone();
        handlers.extend(middleware);
        RouterGroup {
            base_path: join_paths(&self.base_path, relative_path),
            handlers,
            engine: self.engine.clone(),
        }
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

    /// Computes the absolute path and delegates registration to the
    /// owning [`Engine`], combining this group's middleware with the
    /// route's own handlers.
    pub fn handle(&self, method: Method, relative_path: &str, handlers: Vec<Handler>) -> Result<(), InsertError> {
        let full_path = join_paths(&self.base_path, relative_path);
        self.engine.register(method, &full_path, &self.handlers, &handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use bytes::Bytes;
    use http::{Method, Request};

    fn request(method: Method, path: &str) -> Request<Bytes> {
        Request::builder().method(method).uri(path).body(Bytes::new()).unwrap()
    }

    #[test]
    fn nested_group_inherits_middleware_and_joins_paths() {
        let engine = Engine::new();
        let calls: std::sync::Arc<parking_lot::Mutex<Vec<&'static str>>> = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        let api = engine.group("/api");
        let c1 = calls.clone();
        let mut v1 = api.group("/v1", vec![Handler::new(move |ctx: &mut Context| {
            c1.lock().push("v1-mw");
            ctx.next();
        })]);
        let c2 = calls.clone();
        v1.use_middleware(Handler::new(move |ctx: &mut Context| {
            c2.lock().push("v1-mw2");
            ctx.next();
        }));

        let c3 = calls.clone();
        v1.get("/users", vec![Handler::new(move |_ctx: &mut Context| {
            c3.lock().push("handler");
        })])
        .unwrap();

        struct Sink;
        impl std::io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        engine.serve_http(request(Method::GET, "/api/v1/users"), Box::new(Sink));
        assert_eq!(*calls.lock(), vec!["v1-mw", "v1-mw2", "handler"]);
    }
}
