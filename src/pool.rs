//! A small pool of reusable [`Context`]s.
//!
//! The reference design never pools its request context — `xitca-web`'s
//! `WebContext` borrows directly from the in-flight request and is dropped
//! with it. This crate's dispatcher runs one OS thread per worker rather
//! than a future per request, so a genuinely reusable `Context` avoids an
//! allocation (and the keys map's hasher setup) on every request. The
//! "never leak unreset state" discipline mirrors
//! [`crate::params::Params::truncate`]'s doc comment.

use parking_lot::Mutex;

use crate::context::Context;

pub struct Pool {
    free: Mutex<Vec<Box<Context>>>,
}

impl Pool {
    pub fn new() -> Self {
        Self { free: Mutex::new(Vec::new()) }
    }

    /// Takes a [`Context`] from the pool, or allocates a fresh one if the
    /// pool is empty. The caller must call [`Context::reset`]-equivalent
    /// state (done by [`crate::engine::Engine::serve_http`]) before use.
    pub fn acquire(&self) -> Box<Context> {
        self.free.lock().pop().unwrap_or_else(|| Box::new(Context::new()))
    }

    /// Returns a [`Context`] to the pool for reuse by a future request.
    pub fn release(&self, ctx: Box<Context>) {
        self.free.lock().push(ctx);
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}
