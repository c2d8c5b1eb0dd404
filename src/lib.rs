//! A radix-tree HTTP router and request dispatcher.
//!
//! [`Engine`] owns one route tree per HTTP method and dispatches each
//! incoming request through a cooperative middleware chain built from
//! [`Handler`]s. Routes are matched by a compressed trie supporting
//! static segments, named parameters (`:id`), and catch-alls (`*rest`),
//! with trailing-slash and case-insensitive recovery redirects and a
//! `405 Method Not Allowed` fallback carrying an `Allow` header.
//!
//! ```no_run
//! use kestrel::{Context, Engine, Handler};
//!
//! let engine = Engine::default_with_middleware();
//! engine
//!     .get("/user/:name", vec![Handler::new(|ctx: &mut Context| {
//!         let name = ctx.params().get("name").unwrap_or_default().to_string();
//!         let _ = ctx.writer().write_str(&name);
//!     })])
//!     .unwrap();
//! engine.run(&[]).unwrap();
//! ```

mod binding;
mod config;
mod context;
mod engine;
mod error;
mod group;
mod handler;
mod methods;
mod net;
mod params;
mod path;
mod pool;
mod render;
mod tree;
mod writer;

pub use binding::{Binding, BindingBody};
pub use config::{Config, ConfigError};
pub use context::Context;
pub use engine::Engine;
pub use error::{Error, InsertError, Kind, MatchError};
pub use group::RouterGroup;
pub use handler::{Handler, HandlerChain};
pub use params::{Param, Params};
pub use render::Render;
pub use writer::ResponseWriter;
