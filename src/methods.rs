//! The per-HTTP-method forest of route trees.

use http::Method;

use crate::error::InsertError;
use crate::handler::HandlerChain;
use crate::tree::{Lookup, Node};

/// One [`Node`] per HTTP method that has at least one registered route.
///
/// Grounded on the three-way error split in
/// `examples/HFQR-xitca-web/http/src/util/service/router.rs`'s
/// `RouterError<E>` (`Match`/`NotAllowed`/`Service`), adapted here as a
/// lookup result that also carries the method-not-allowed `Allow` set.
pub struct MethodTrees {
    trees: Vec<(Method, Node<HandlerChain>)>,
}

impl MethodTrees {
    pub fn new() -> Self {
        Self { trees: Vec::new() }
    }

    pub fn insert(&mut self, method: Method, pattern: &str, handlers: HandlerChain) -> Result<(), InsertError> {
        if handlers.is_empty() {
            return Err(InsertError::NoHandlers);
        }
        match self.trees.iter_mut().find(|(m, _)| *m == method) {
            Some((_, tree)) => tree.insert(pattern, handlers),
            None => {
                let mut tree = Node::new();
                tree.insert(pattern, handlers)?;
                self.trees.push((method, tree));
                Ok(())
            }
        }
    }

    /// Looks up `path` under `method`.
    pub fn at(&self, method: &Method, path: &str, unescape: bool) -> Lookup<'_, HandlerChain> {
        self.at_with_capacity(method, path, unescape, 0, 0)
    }

    /// As [`Self::at`], pre-sizing the lookup's params list and
    /// backtracking stack (see [`crate::tree::Node::at_with_capacity`]).
    pub fn at_with_capacity(&self, method: &Method, path: &str, unescape: bool, params_capacity: usize, skipped_capacity: usize) -> Lookup<'_, HandlerChain> {
        match self.trees.iter().find(|(m, _)| m == method) {
            Some((_, tree)) => tree.at_with_capacity(path, unescape, params_capacity, skipped_capacity),
            None => Lookup::miss(),
        }
    }

    /// Returns the set of methods, other than `exclude`, under which `path`
    /// matches exactly. Used to build a `405 Method Not Allowed`'s `Allow`
    /// header.
    pub fn allowed_methods(&self, path: &str, exclude: &Method) -> Vec<Method> {
        self.trees
            .iter()
            .filter(|(m, _)| m != exclude)
            .filter(|(_, tree)| tree.at(path, true).handlers.is_some())
            .map(|(m, _)| m.clone())
            .collect()
    }

    /// Attempts a case-insensitive / trailing-slash-corrected match for
    /// `path` under `method`'s own tree only — mirroring the reference
    /// dispatcher, which never redirects a path into a *different*
    /// method's tree (that's the 405 fallback's job).
    pub fn find_case_insensitive(&self, method: &Method, path: &str, fix_trailing_slash: bool) -> Option<String> {
        self.trees.iter().find(|(m, _)| m == method).and_then(|(_, tree)| tree.find_case_insensitive(path, fix_trailing_slash))
    }
}

impl Default for MethodTrees {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;

    fn chain() -> HandlerChain {
        HandlerChain::from(vec![Handler::from(|_ctx: &mut crate::context::Context| {})])
    }

    #[test]
    fn tracks_multiple_methods() {
        let mut trees = MethodTrees::new();
        trees.insert(Method::GET, "/a", chain()).unwrap();
        trees.insert(Method::POST, "/a", chain()).unwrap();
        assert!(trees.at(&Method::GET, "/a", true).handlers.is_some());
        assert!(trees.at(&Method::POST, "/a", true).handlers.is_some());
        assert!(trees.at(&Method::DELETE, "/a", true).handlers.is_none());
    }

    #[test]
    fn reports_allowed_methods_for_405() {
        let mut trees = MethodTrees::new();
        trees.insert(Method::GET, "/a", chain()).unwrap();
        trees.insert(Method::POST, "/a", chain()).unwrap();
        let allowed = trees.allowed_methods("/a", &Method::DELETE);
        assert_eq!(allowed.len(), 2);
    }

    #[test]
    fn case_insensitive_lookup_is_method_scoped() {
        let mut trees = MethodTrees::new();
        trees.insert(Method::GET, "/x", chain()).unwrap();
        assert_eq!(trees.find_case_insensitive(&Method::GET, "/x", true), Some("/x".to_string()));
        assert_eq!(trees.find_case_insensitive(&Method::PUT, "/x", true), None);
    }

    #[test]
    fn rejects_empty_handler_chain() {
        let mut trees = MethodTrees::new();
        assert_eq!(trees.insert(Method::GET, "/a", HandlerChain::from(vec![])), Err(InsertError::NoHandlers));
    }
}
