//! Route parameters bound during a lookup.

/// A single bound route parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    key: String,
    value: String,
}

impl Param {
    /// The parameter's name (without the leading `:` or `*`).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The bound value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An ordered sequence of bound [`Param`]s.
///
/// Deliberately positional rather than a map: the reference design
/// (`examples/HFQR-xitca-web/router/src/params.rs`) doesn't deduplicate
/// by key, since a pattern with two segments sharing a parameter name is
/// legal (if unusual) and both bindings should be observable.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<Param>);

impl Params {
    /// Creates an empty parameter list.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates an empty parameter list pre-sized for `capacity` bindings,
    /// so a lookup that binds that many params doesn't reallocate.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Appends a bound parameter.
    pub(crate) fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Param {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Drops parameters beyond index `n`, keeping the backing allocation.
    ///
    /// Used both for tree-lookup backtracking and for returning a pooled
    /// [`crate::context::Context`] to a clean state without reallocating.
    pub(crate) fn truncate(&mut self, n: usize) {
        self.0.truncate(n);
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value of the *first* parameter registered under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }

    /// Iterates over all bound parameters in binding order.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get() {
        let mut p = Params::new();
        p.push("id", "42");
        p.push("id", "43");
        assert_eq!(p.get("id"), Some("42"));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn truncate_keeps_capacity() {
        let mut p = Params::new();
        p.push("a", "1");
        p.push("b", "2");
        p.truncate(0);
        assert!(p.is_empty());
        assert!(p.0.capacity() >= 2);
    }
}
