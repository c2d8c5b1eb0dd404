//! The per-method radix tree: route registration and lookup.
//!
//! Grounded on `examples/HFQR-xitca-web/router/src/tree.rs`'s `Node<T>`:
//! same `indices`/`wild_child`/`priority` shape, same split-on-common-prefix
//! insertion, same skipped-node backtracking stack on lookup. Departures are
//! noted inline and in `DESIGN.md` — chiefly the `:name`/`*name`/`\:` syntax
//! in place of the teacher's `{name}` syntax, and the trailing-slash /
//! case-insensitive recovery paths the teacher's router doesn't have.

mod escape;

use crate::error::InsertError;
use crate::params::Params;
use escape::{find_wildcard, ResolvedPattern};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum NodeType {
    Root,
    Static,
    Param,
    CatchAll,
}

/// A single node of a method's route tree.
pub struct Node<T> {
    path: String,
    indices: Vec<u8>,
    wild_child: bool,
    node_type: NodeType,
    priority: u32,
    children: Vec<Node<T>>,
    handlers: Option<T>,
    full_path: String,
}

impl<T> Node<T> {
    pub(crate) fn new() -> Self {
        Self {
            path: String::new(),
            indices: Vec::new(),
            wild_child: false,
            node_type: NodeType::Static,
            priority: 0,
            children: Vec::new(),
            handlers: None,
            full_path: String::new(),
        }
    }

    /// Registers `pattern` with `handlers`.
    ///
    /// `pattern` must start with `/`. `:name` binds one path segment,
    /// `*name` binds the remainder of the path and must be the pattern's
    /// final segment preceded by `/`. A literal colon is written `\:`.
    pub fn insert(&mut self, pattern: &str, handlers: T) -> Result<(), InsertError> {
        if !pattern.starts_with('/') {
            return Err(InsertError::MissingLeadingSlash);
        }

        let resolved = ResolvedPattern::new(pattern)?;
        self.priority += 1;

        if self.path.is_empty() && self.children.is_empty() {
            self.node_type = NodeType::Root;
            return self.insert_child(&resolved.bytes, pattern, handlers, &resolved);
        }

        self.insert_at(&resolved.bytes, pattern, handlers, &resolved)
    }

    fn insert_at(
        &mut self,
        path: &[u8],
        full_path: &str,
        handlers: T,
        resolved: &ResolvedPattern,
    ) -> Result<(), InsertError> {
        let mut current = self;
        let mut path = path;

        'walk: loop {
            let common = longest_common_prefix(path, current.path.as_bytes());

            if common < current.path.len() {
                let tail = Node {
                    path: current.path[common..].to_string(),
                    indices: std::mem::take(&mut current.indices),
                    wild_child: current.wild_child,
                    node_type: if current.node_type == NodeType::Root {
                        NodeType::Static
                    } else {
                        current.node_type
                    },
                    priority: current.priority.saturating_sub(1).max(1),
                    children: std::mem::take(&mut current.children),
                    handlers: current.handlers.take(),
                    full_path: std::mem::take(&mut current.full_path),
                };

                current.path.truncate(common);
                current.indices = vec![tail.path.as_bytes()[0]];
                current.children = vec![tail];
                current.wild_child = false;
            }

            if common < path.len() {
                let rest = &path[common..];
                let first = rest[0];

                if let Some(i) = current.indices.iter().position(|&b| b == first) {
                    let i = current.bump_child_priority(i);
                    current = &mut current.children[i];
                    path = rest;
                    continue 'walk;
                }

                // A static child and (at most one) wildcard child may
                // coexist at the same position: static candidates are
                // always tried first via `indices`, the wildcard is the
                // fallback. Two *different* wildcards at the same position
                // never coexist.
                if first == b':' || first == b'*' {
                    if current.wild_child {
                        let child = current.children.last_mut().unwrap();
                        let same_param = child.node_type == NodeType::Param && rest.starts_with(child.path.as_bytes());

                        if same_param {
                            child.priority += 1;
                            let child_len = child.path.len();
                            if rest.len() == child_len {
                                if child.handlers.is_some() {
                                    return Err(InsertError::Conflict {
                                        with: child.full_path.clone(),
                                    });
                                }
                                child.handlers = Some(handlers);
                                child.full_path = full_path.to_string();
                                return Ok(());
                            }
                            path = rest;
                            current = child;
                            continue 'walk;
                        }

                        return Err(InsertError::WildcardConflict {
                            pattern: full_path.to_string(),
                            conflicting_prefix: current.full_path.clone(),
                        });
                    }
                    return current.insert_child(rest, full_path, handlers, resolved);
                }

                if current.node_type == NodeType::CatchAll {
                    return current.insert_child(rest, full_path, handlers, resolved);
                }

                let idx = current.add_child(Node::new());
                current.indices.push(first);
                let idx = current.bump_child_priority(idx);
                current = &mut current.children[idx];
                return current.insert_child(rest, full_path, handlers, resolved);
            }

            // common == path.len(): path is fully consumed.
            if common < current.path.len() {
                unreachable!("split above guarantees common == current.path.len() here");
            }

            if current.handlers.is_some() {
                return Err(InsertError::Conflict {
                    with: current.full_path.clone(),
                });
            }
            current.handlers = Some(handlers);
            current.full_path = full_path.to_string();
            return Ok(());
        }
    }

    /// Bumps `children[i]`'s priority, bubbling it left past lower-priority
    /// siblings (keeping `indices` in lockstep), and returns its new index.
    fn bump_child_priority(&mut self, i: usize) -> usize {
        self.children[i].priority += 1;
        let priority = self.children[i].priority;

        let mut new_i = i;
        while new_i > 0 && self.children[new_i - 1].priority < priority {
            self.children.swap(new_i - 1, new_i);
            new_i -= 1;
        }

        if new_i != i {
            let moved = self.indices.remove(i);
            self.indices.insert(new_i, moved);
        }

        new_i
    }

    fn add_child(&mut self, child: Node<T>) -> usize {
        let len = self.children.len();
        if self.wild_child && len > 0 {
            self.children.insert(len - 1, child);
            len - 1
        } else {
            self.children.push(child);
            len
        }
    }

    fn insert_child(
        &mut self,
        mut path: &[u8],
        full_path: &str,
        handlers: T,
        resolved: &ResolvedPattern,
    ) -> Result<(), InsertError> {
        let mut current = self;
        let full_path_offset = path_offset(full_path, path);
        let mut consumed = 0usize;

        loop {
            let offset = full_path_offset + consumed;
            let found = find_wildcard(path, offset, resolved)?;
            let (wildcard, wildcard_index) = match found {
                Some(w) => w,
                None => {
                    current.path = String::from_utf8_lossy(path).into_owned();
                    current.handlers = Some(handlers);
                    current.full_path = full_path.to_string();
                    return Ok(());
                }
            };

            if wildcard.len() < 2 {
                return Err(InsertError::UnnamedWildcard);
            }

            if wildcard[0] == b':' {
                if wildcard_index > 0 {
                    current.path = String::from_utf8_lossy(&path[..wildcard_index]).into_owned();
                    path = &path[wildcard_index..];
                    consumed += wildcard_index;
                }

                let param_len = wildcard.len();
                let mut child = Node::new();
                child.node_type = NodeType::Param;
                child.path = String::from_utf8_lossy(wildcard).into_owned();
                let idx = current.add_child(child);
                current.wild_child = true;
                current = &mut current.children[idx];
                current.priority += 1;

                if param_len < path.len() {
                    path = &path[param_len..];
                    consumed += param_len;
                    let idx = current.add_child(Node {
                        priority: 1,
                        ..Node::new()
                    });
                    current = &mut current.children[idx];
                    continue;
                }

                current.handlers = Some(handlers);
                current.full_path = full_path.to_string();
                return Ok(());
            }

            // '*name' catch-all.
            if wildcard_index + wildcard.len() != path.len() {
                return Err(InsertError::CatchAllNotTerminal);
            }
            if wildcard_index == 0 || path[wildcard_index - 1] != b'/' {
                return Err(InsertError::CatchAllMissingSlash);
            }

            let slash_index = wildcard_index - 1;
            current.path = String::from_utf8_lossy(&path[..slash_index]).into_owned();

            let mut slot = Node::new();
            slot.node_type = NodeType::CatchAll;
            slot.wild_child = true;

            let leaf = Node {
                path: String::from_utf8_lossy(&path[slash_index..]).into_owned(),
                node_type: NodeType::CatchAll,
                handlers: Some(handlers),
                full_path: full_path.to_string(),
                priority: 1,
                ..Node::new()
            };
            slot.children.push(leaf);

            let idx = current.add_child(slot);
            current.wild_child = true;
            current.children[idx].priority += 1;
            return Ok(());
        }
    }

    /// Looks up `path` against this tree.
    ///
    /// `unescape` controls whether percent-decoded bytes are applied to
    /// bound parameter values (see [`crate::engine::Engine`]'s
    /// `UseRawPath` equivalent).
    pub fn at(&self, path: &str, unescape: bool) -> Lookup<'_, T> {
        self.at_with_capacity(path, unescape, 0, 0)
    }

    /// As [`Self::at`], but pre-sizing the bound-params list and the
    /// backtracking stack so a lookup that needs `params_capacity`
    /// bindings or `skipped_capacity` backtrack frames doesn't reallocate
    /// partway through. [`crate::engine::Engine`] tracks the largest of
    /// each seen across every registered route and passes them here.
    pub fn at_with_capacity(&self, path: &str, unescape: bool, params_capacity: usize, skipped_capacity: usize) -> Lookup<'_, T> {
        let mut current = self;
        let mut remaining = path;
        let mut params = Params::with_capacity(params_capacity);
        let mut backtracking = false;
        let mut skipped: Vec<Skipped<'_, T>> = Vec::with_capacity(skipped_capacity);

        'walk: loop {
            if remaining.len() > current.path.len() && remaining.as_bytes()[..current.path.len()] == *current.path.as_bytes() {
                let consumed_full = remaining;
                remaining = &remaining[current.path.len()..];

                if !backtracking && !remaining.is_empty() {
                    let first = remaining.as_bytes()[0];
                    if let Some(i) = current.indices.iter().position(|&b| b == first) {
                        if current.wild_child {
                            skipped.push(Skipped {
                                path: consumed_full,
                                node: current,
                                params_len: params.len(),
                            });
                        }
                        current = &current.children[i];
                        backtracking = false;
                        continue 'walk;
                    }
                }

                if !current.wild_child {
                    if remaining != "/" {
                        if let Some(node) = backtrack(&mut skipped, &mut remaining, &mut params) {
                            current = node;
                            backtracking = true;
                            continue 'walk;
                        }
                    }
                    if remaining == "/" && current.handlers.is_some() {
                        return Lookup::tsr();
                    }
                    if let Some(node) = backtrack(&mut skipped, &mut remaining, &mut params) {
                        current = node;
                        backtracking = true;
                        continue 'walk;
                    }
                    return Lookup::miss();
                }

                backtracking = false;
                let wild = current.children.last().unwrap();

                match wild.node_type {
                    NodeType::Param => {
                        let bytes = remaining.as_bytes();
                        match bytes.iter().position(|&b| b == b'/') {
                            Some(slash) => {
                                let value = &remaining[..slash];
                                let tail = &remaining[slash..];
                                if wild.children.len() == 1 {
                                    params.push(&wild.path[1..], unescape_value(value, unescape));
                                    remaining = tail;
                                    current = &wild.children[0];
                                    continue 'walk;
                                }
                                if let Some(node) = backtrack(&mut skipped, &mut remaining, &mut params) {
                                    current = node;
                                    backtracking = true;
                                    continue 'walk;
                                }
                                return Lookup::miss();
                            }
                            None => {
                                if let Some(ref handlers) = wild.handlers {
                                    params.push(&wild.path[1..], unescape_value(remaining, unescape));
                                    return Lookup::hit(handlers, params, &wild.full_path);
                                }
                                if wild.children.iter().any(|c| c.path == "/" && c.handlers.is_some()) {
                                    return Lookup::tsr();
                                }
                                if let Some(node) = backtrack(&mut skipped, &mut remaining, &mut params) {
                                    current = node;
                                    backtracking = true;
                                    continue 'walk;
                                }
                                return Lookup::miss();
                            }
                        }
                    }
                    NodeType::CatchAll => {
                        let leaf = &wild.children[0];
                        return match leaf.handlers {
                            Some(ref handlers) => {
                                let key = &leaf.path[2..];
                                params.push(key, unescape_value(remaining, unescape));
                                Lookup::hit(handlers, params, &leaf.full_path)
                            }
                            None => Lookup::miss(),
                        };
                    }
                    _ => unreachable!("wildcard child is always Param or CatchAll"),
                }
            } else if remaining == current.path {
                if let Some(ref handlers) = current.handlers {
                    return Lookup::hit(handlers, params, &current.full_path);
                }
                if current
                    .children
                    .iter()
                    .find(|c| c.path == "/")
                    .is_some_and(|c| c.handlers.is_some())
                {
                    return Lookup::tsr();
                }
            } else if current.path.len() == remaining.len() + 1
                && current.path.as_bytes()[remaining.len()] == b'/'
                && current.path.starts_with(remaining)
                && current.handlers.is_some()
            {
                return Lookup::tsr();
            }

            if let Some(node) = backtrack(&mut skipped, &mut remaining, &mut params) {
                current = node;
                backtracking = true;
                continue 'walk;
            }
            return Lookup::miss();
        }
    }

    /// Finds a case-insensitive match for `path`, optionally correcting a
    /// single trailing slash, for use in the dispatcher's 404 recovery
    /// path. Returns the canonical path to redirect to.
    pub fn find_case_insensitive(&self, path: &str, fix_trailing_slash: bool) -> Option<String> {
        let mut buf = String::new();
        if self.find_case_insensitive_rec(path.as_bytes(), &mut buf, fix_trailing_slash) {
            Some(buf)
        } else {
            None
        }
    }

    fn find_case_insensitive_rec(&self, path: &[u8], buf: &mut String, fix_trailing_slash: bool) -> bool {
        let node_path = self.path.as_bytes();
        let common = longest_common_prefix_ci(path, node_path);
        if common < node_path.len() {
            // The whole request path matched case-insensitively except for
            // one missing trailing slash this node's own path carries.
            if fix_trailing_slash
                && common == path.len()
                && node_path.len() == path.len() + 1
                && node_path.ends_with(b"/")
                && self.handlers.is_some()
            {
                buf.push_str(&self.path);
                return true;
            }
            return false;
        }

        buf.push_str(&self.path);
        let rest = &path[common..];

        if rest.is_empty() {
            if self.handlers.is_some() {
                return true;
            }
            if fix_trailing_slash {
                if let Some(i) = self.indices.iter().position(|&b| b == b'/') {
                    let child = &self.children[i];
                    let ok = (child.path == "/" && child.handlers.is_some())
                        || (child.node_type == NodeType::CatchAll && child.children.first().is_some_and(|c| c.handlers.is_some()));
                    if ok {
                        buf.push('/');
                        return true;
                    }
                }
            }
            return false;
        }

        let first = rest[0];
        for candidate in [first.to_ascii_lowercase(), first.to_ascii_uppercase()] {
            if let Some(i) = self.indices.iter().position(|&b| b == candidate) {
                let mut attempt = buf.clone();
                if self.children[i].find_case_insensitive_rec(rest, &mut attempt, fix_trailing_slash) {
                    *buf = attempt;
                    return true;
                }
            }
        }

        if self.wild_child {
            let child = self.children.last().unwrap();
            match child.node_type {
                NodeType::Param => {
                    let slash = rest.iter().position(|&b| b == b'/').unwrap_or(rest.len());
                    let (value, tail) = rest.split_at(slash);
                    buf.push_str(&String::from_utf8_lossy(value));
                    if tail.is_empty() {
                        if child.handlers.is_some() {
                            return true;
                        }
                        if fix_trailing_slash && child.children.len() == 1 {
                            let grandchild = &child.children[0];
                            if grandchild.path == "/" && grandchild.handlers.is_some() {
                                buf.push('/');
                                return true;
                            }
                        }
                        return false;
                    }
                    if let [ref grandchild] = child.children[..] {
                        return grandchild.find_case_insensitive_rec(tail, buf, fix_trailing_slash);
                    }
                    return false;
                }
                NodeType::CatchAll => {
                    let leaf = &child.children[0];
                    if leaf.handlers.is_some() {
                        buf.push_str(&String::from_utf8_lossy(rest));
                        return true;
                    }
                    return false;
                }
                _ => return false,
            }
        }

        fix_trailing_slash && rest == b"/" && self.handlers.is_some()
    }
}

/// The outcome of [`Node::at`].
pub struct Lookup<'a, T> {
    /// The matched handlers, if any.
    pub handlers: Option<&'a T>,
    /// Parameters bound along the matched path.
    pub params: Params,
    /// The original registered pattern, for diagnostics and route groups.
    pub full_path: &'a str,
    /// Set when no exact match was found but one exists modulo a single
    /// trailing slash.
    pub tsr: bool,
}

impl<'a, T> Lookup<'a, T> {
    fn hit(handlers: &'a T, params: Params, full_path: &'a str) -> Self {
        Self {
            handlers: Some(handlers),
            params,
            full_path,
            tsr: false,
        }
    }

    /// An empty, no-match result (no tree registered for the method at all).
    pub(crate) fn miss() -> Self {
        Self {
            handlers: None,
            params: Params::new(),
            full_path: "",
            tsr: false,
        }
    }

    fn tsr() -> Self {
        Self {
            handlers: None,
            params: Params::new(),
            full_path: "",
            tsr: true,
        }
    }
}

struct Skipped<'n, T> {
    path: &'n str,
    node: &'n Node<T>,
    params_len: usize,
}

fn backtrack<'n, T>(skipped: &mut Vec<Skipped<'n, T>>, path: &mut &'n str, params: &mut Params) -> Option<&'n Node<T>> {
    while let Some(s) = skipped.pop() {
        if s.path.ends_with(*path) {
            *path = s.path;
            params.truncate(s.params_len);
            return Some(s.node);
        }
    }
    None
}

fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn longest_common_prefix_ci(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b.iter())
        .take_while(|(x, y)| x.to_ascii_lowercase() == y.to_ascii_lowercase())
        .count()
}

fn path_offset(full_path: &str, suffix: &[u8]) -> usize {
    full_path.len().saturating_sub(suffix.len())
}

fn unescape_value(value: &str, unescape: bool) -> std::borrow::Cow<'_, str> {
    if !unescape || !value.contains('%') {
        return std::borrow::Cow::Borrowed(value);
    }
    percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .unwrap_or(std::borrow::Cow::Borrowed(value))
        .into_owned()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn inserts_and_matches_static_route() {
        let mut root: Node<String> = Node::new();
        root.insert("/users/list", leaf("list")).unwrap();
        let found = root.at("/users/list", true);
        assert_eq!(found.handlers, Some(&leaf("list")));
    }

    #[test]
    fn inserts_and_matches_param_route() {
        let mut root: Node<String> = Node::new();
        root.insert("/user/:id", leaf("show")).unwrap();
        let found = root.at("/user/42", true);
        assert_eq!(found.handlers, Some(&leaf("show")));
        assert_eq!(found.params.get("id"), Some("42"));
    }

    #[test]
    fn inserts_and_matches_catch_all() {
        let mut root: Node<String> = Node::new();
        root.insert("/files/*filepath", leaf("serve")).unwrap();
        let found = root.at("/files/a/b/c.txt", true);
        assert_eq!(found.handlers, Some(&leaf("serve")));
        assert_eq!(found.params.get("filepath"), Some("/a/b/c.txt"));
    }

    #[test]
    fn detects_trailing_slash_recommendation() {
        let mut root: Node<String> = Node::new();
        root.insert("/a/b", leaf("h")).unwrap();
        let found = root.at("/a/b/", true);
        assert!(found.handlers.is_none());
        assert!(found.tsr);
    }

    #[test]
    fn detects_trailing_slash_recommendation_reverse() {
        let mut root: Node<String> = Node::new();
        root.insert("/a/b/", leaf("h")).unwrap();
        let found = root.at("/a/b", true);
        assert!(found.handlers.is_none());
        assert!(found.tsr);
    }

    #[test]
    fn rejects_missing_leading_slash() {
        let mut root: Node<String> = Node::new();
        assert_eq!(root.insert("no-slash", leaf("x")), Err(InsertError::MissingLeadingSlash));
    }

    #[test]
    fn rejects_duplicate_routes() {
        let mut root: Node<String> = Node::new();
        root.insert("/a", leaf("1")).unwrap();
        assert!(matches!(root.insert("/a", leaf("2")), Err(InsertError::Conflict { .. })));
    }

    #[test]
    fn rejects_catch_all_not_terminal() {
        let mut root: Node<String> = Node::new();
        assert_eq!(root.insert("/files/*rest/more", leaf("x")), Err(InsertError::CatchAllNotTerminal));
    }

    #[test]
    fn rejects_catch_all_missing_slash() {
        let mut root: Node<String> = Node::new();
        assert_eq!(root.insert("/files*rest", leaf("x")), Err(InsertError::CatchAllMissingSlash));
    }

    #[test]
    fn finds_case_insensitive_match() {
        let mut root: Node<String> = Node::new();
        root.insert("/Search", leaf("s")).unwrap();
        assert_eq!(root.find_case_insensitive("/search", false), Some("/Search".to_string()));
    }

    #[test]
    fn finds_case_insensitive_match_with_trailing_slash_fix() {
        let mut root: Node<String> = Node::new();
        root.insert("/Search/", leaf("s")).unwrap();
        assert_eq!(root.find_case_insensitive("/search", true), Some("/Search/".to_string()));
    }

    #[test]
    fn static_sibling_coexists_with_wildcard_and_wins() {
        let mut root: Node<String> = Node::new();
        root.insert("/user/:id", leaf("param")).unwrap();
        root.insert("/user/new", leaf("static")).unwrap();

        let found = root.at("/user/new", true);
        assert_eq!(found.handlers, Some(&leaf("static")));
        assert!(found.params.is_empty());

        let found = root.at("/user/42", true);
        assert_eq!(found.handlers, Some(&leaf("param")));
        assert_eq!(found.params.get("id"), Some("42"));
    }

    #[test]
    fn two_different_param_names_at_same_position_conflict() {
        let mut root: Node<String> = Node::new();
        root.insert("/user/:id", leaf("by_id")).unwrap();
        assert!(matches!(
            root.insert("/user/:name", leaf("by_name")),
            Err(InsertError::WildcardConflict { .. })
        ));
    }

    #[test]
    fn priority_reorders_frequently_split_siblings() {
        let mut root: Node<String> = Node::new();
        root.insert("/a", leaf("a")).unwrap();
        root.insert("/b", leaf("b")).unwrap();
        root.insert("/b", leaf("b-again")).unwrap_err();
        root.insert("/bb", leaf("bb")).unwrap();
        assert_eq!(root.at("/a", true).handlers, Some(&leaf("a")));
        assert_eq!(root.at("/b", true).handlers, Some(&leaf("b")));
        assert_eq!(root.at("/bb", true).handlers, Some(&leaf("bb")));
    }

    #[test]
    fn escaped_colon_is_literal() {
        let mut root: Node<String> = Node::new();
        root.insert("/a/\\:b", leaf("literal")).unwrap();
        let found = root.at("/a/:b", true);
        assert_eq!(found.handlers, Some(&leaf("literal")));
    }
}
