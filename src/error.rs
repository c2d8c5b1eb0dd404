//! Error types for route registration, lookup, and per-request accumulation.

use core::fmt;
use std::error;

/// Failure to insert a route pattern into a [`crate::tree::Node`].
///
/// Mirrors the fail-fast registration errors in the reference design:
/// missing leading `/`, duplicate routes, wildcard conflicts, and
/// catch-alls that aren't the final segment are all reported here rather
/// than panicking, so callers can choose to `.unwrap()` at startup or
/// recover.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InsertError {
    /// The pattern doesn't start with `/`.
    MissingLeadingSlash,
    /// A route with an identical normalized pattern is already registered.
    Conflict {
        /// The existing pattern the insertion conflicts with.
        with: String,
    },
    /// Two different wildcards were registered at the same tree position.
    WildcardConflict {
        /// The pattern being inserted.
        pattern: String,
        /// The prefix at which the conflict was detected.
        conflicting_prefix: String,
    },
    /// A `:name`/`*name` segment has no name (bare `:` or `*`).
    UnnamedWildcard,
    /// A segment contains more than one wildcard, e.g. `/:a:b`.
    TooManyParams,
    /// `*name` did not occupy the final segment of the pattern.
    CatchAllNotTerminal,
    /// `*name` was not preceded by `/`.
    CatchAllMissingSlash,
    /// A `\` escape preceded a byte other than `:`.
    InvalidEscape,
    /// The handler chain (group + route) exceeds the abort sentinel.
    HandlerChainTooLong,
    /// The handler list was empty.
    NoHandlers,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLeadingSlash => write!(f, "route pattern must start with '/'"),
            Self::Conflict { with } => write!(f, "route conflicts with already registered pattern: {with}"),
            Self::WildcardConflict {
                pattern,
                conflicting_prefix,
            } => write!(f, "'{pattern}' conflicts with existing wildcard at '{conflicting_prefix}'"),
            Self::UnnamedWildcard => write!(f, "wildcards must be named, e.g. ':id' or '*path'"),
            Self::TooManyParams => write!(f, "only one wildcard is allowed per path segment"),
            Self::CatchAllNotTerminal => write!(f, "catch-all must be the final segment of the pattern"),
            Self::CatchAllMissingSlash => write!(f, "catch-all must be preceded by '/'"),
            Self::InvalidEscape => write!(f, "only ':' may be escaped with '\\'"),
            Self::HandlerChainTooLong => write!(f, "combined handler chain exceeds the maximum length"),
            Self::NoHandlers => write!(f, "route must be registered with at least one handler"),
        }
    }
}

impl error::Error for InsertError {}

/// A lookup attempt found no matching route.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct MatchError;

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no matching route")
    }
}

impl error::Error for MatchError {}

/// Bitmask of error kinds, mirroring the reference design's `{Bind, Render,
/// Private, Public, Any}` taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Kind(u8);

impl Kind {
    /// An error produced while binding a request body to a destination type.
    pub const BIND: Kind = Kind(1 << 0);
    /// An error produced while rendering a response.
    pub const RENDER: Kind = Kind(1 << 1);
    /// An error not meant to be shown to the caller (internal detail).
    pub const PRIVATE: Kind = Kind(1 << 2);
    /// An error safe to surface to the caller.
    pub const PUBLIC: Kind = Kind(1 << 3);
    /// All kinds; used when filtering without discrimination.
    pub const ANY: Kind = Kind(0b1111);

    /// Returns `true` if `self` includes every bit set in `other`.
    pub fn contains(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for Kind {
    type Output = Kind;

    fn bitor(self, rhs: Kind) -> Kind {
        Kind(self.0 | rhs.0)
    }
}

/// A single accumulated request error: an underlying cause, a [`Kind`]
/// bitmask, and optional metadata.
///
/// Errors are never thrown across a request boundary; handlers append them
/// to [`crate::context::Context`] via [`crate::context::Context::error`] and
/// middleware may inspect or render them later.
pub struct Error {
    cause: Box<dyn error::Error + Send + Sync>,
    kind: Kind,
    meta: Option<Box<dyn std::any::Any + Send + Sync>>,
}

impl Error {
    /// Wraps `cause` as a [`Kind::PRIVATE`] error.
    pub fn private<E>(cause: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            cause: cause.into(),
            kind: Kind::PRIVATE,
            meta: None,
        }
    }

    /// Wraps `cause` under an explicit `kind`.
    pub fn with_kind<E>(cause: E, kind: Kind) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self {
            cause: cause.into(),
            kind,
            meta: None,
        }
    }

    /// Attaches an arbitrary metadata payload, replacing any previous one.
    pub fn with_meta<M: std::any::Any + Send + Sync>(mut self, meta: M) -> Self {
        self.meta = Some(Box::new(meta));
        self
    }

    /// Returns the error's kind bitmask.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the underlying cause.
    pub fn cause(&self) -> &(dyn error::Error + Send + Sync) {
        &*self.cause
    }

    /// Returns the attached metadata, if any and if it downcasts to `M`.
    pub fn meta<M: std::any::Any>(&self) -> Option<&M> {
        self.meta.as_deref().and_then(|m| m.downcast_ref())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error").field("cause", &self.cause).field("kind", &self.kind).finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&*self.cause)
    }
}
