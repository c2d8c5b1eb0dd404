//! Request-binding contracts.
//!
//! Concrete body parsers (JSON, form, query-string, the struct validator)
//! are out of scope for this crate (§1); [`Binding`]/[`BindingBody`] are
//! the thin seam [`crate::context::Context::bind`] and
//! [`crate::context::Context::bind_body`] call through to reach one,
//! shaped like `examples/HFQR-xitca-web/web/src/handler/mod.rs`'s
//! `FromRequest` — a fixed, minimal extraction surface with no default
//! implementations.

use std::any::Any;
use std::error::Error as StdError;

/// Binds a request's method, headers, query string, or URI into a
/// `&mut dyn Any` destination supplied by the caller.
pub trait Binding {
    /// A short name identifying this binding, e.g. `"form"` or `"query"`.
    fn name(&self) -> &'static str;

    /// Binds `request` into `destination`.
    fn bind(&self, request: &http::Request<()>, destination: &mut dyn Any) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// A [`Binding`] that additionally reads the request body.
pub trait BindingBody: Binding {
    /// Binds the raw request body `bytes` into `destination`.
    fn bind_body(&self, bytes: &[u8], destination: &mut dyn Any) -> Result<(), Box<dyn StdError + Send + Sync>>;
}
