//! Response-rendering contract.
//!
//! Concrete renderers (JSON, HTML templates, plain text) are out of scope
//! for this crate (§1); [`Render`] is the seam [`crate::context::Context::render`]
//! drives — it writes the status and content type, then either calls
//! [`Render::render`] for statuses that admit a body or stops after
//! headers for the ones that don't. Shaped like
//! `examples/HFQR-xitca-web/web/src/handler/mod.rs`'s `Responder` side of
//! the extraction/response trait pair.

use std::error::Error as StdError;

use crate::writer::ResponseWriter;

/// Renders a response body and declares its content type.
pub trait Render {
    /// Writes this render's `Content-Type` header onto `writer`, if any.
    fn write_content_type(&self, writer: &mut ResponseWriter);

    /// Writes the response body to `writer`.
    fn render(&self, writer: &mut ResponseWriter) -> Result<(), Box<dyn StdError + Send + Sync>>;
}
