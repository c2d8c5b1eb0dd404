//! Resolves the `\:`-literal-colon escape once per registered pattern and
//! scans for the next `:name`/`*name` wildcard segment.
//!
//! Grounded on the scanning shape of
//! `examples/HFQR-xitca-web/router/src/tree.rs`'s free function
//! `find_wildcard`, generalized from that teacher's `{name}`/`{{`-escape
//! grammar to the spec's `:name`/`*name`/`\:` grammar. Escape resolution
//! happens once here, up front, rather than as a post-registration walk
//! rewriting `\` bytes inside `indices` across the whole tree (see the
//! open-question discussion in `DESIGN.md`).

use crate::error::InsertError;

/// A route pattern with every `\:` escape resolved to a plain `:` byte.
///
/// `escaped` records which byte offsets in `bytes` were originally
/// written as `\:`, so [`find_wildcard`] can tell a literal colon from
/// the start of a parameter without re-scanning for backslashes.
pub(crate) struct ResolvedPattern {
    pub(crate) bytes: Vec<u8>,
    escaped: Vec<usize>,
}

impl ResolvedPattern {
    pub(crate) fn new(pattern: &str) -> Result<Self, InsertError> {
        let input = pattern.as_bytes();
        let mut bytes = Vec::with_capacity(input.len());
        let mut escaped = Vec::new();
        let mut i = 0;
        while i < input.len() {
            if input[i] == b'\\' {
                match input.get(i + 1) {
                    Some(b':') => {
                        escaped.push(bytes.len());
                        bytes.push(b':');
                        i += 2;
                    }
                    _ => return Err(InsertError::InvalidEscape),
                }
            } else {
                bytes.push(input[i]);
                i += 1;
            }
        }
        Ok(Self { bytes, escaped })
    }

    fn is_escaped(&self, absolute_index: usize) -> bool {
        self.escaped.contains(&absolute_index)
    }
}

/// Scans `path`, a suffix of `pattern.bytes` starting at `offset`, for the
/// next wildcard segment.
///
/// Returns `Some((wildcard_bytes, index_within_path))` where
/// `wildcard_bytes` spans from the `:`/`*` marker up to (but not
/// including) the next `/`, or the end of `path`. A byte at a position
/// recorded in `pattern`'s escape table is never treated as a marker.
pub(crate) fn find_wildcard<'p>(
    path: &'p [u8],
    offset: usize,
    pattern: &ResolvedPattern,
) -> Result<Option<(&'p [u8], usize)>, InsertError> {
    for (start, &c) in path.iter().enumerate() {
        if (c != b':' && c != b'*') || pattern.is_escaped(offset + start) {
            continue;
        }

        for (end, &c) in path[start + 1..].iter().enumerate() {
            match c {
                b'/' => return Ok(Some((&path[start..start + 1 + end], start))),
                b':' | b'*' if !pattern.is_escaped(offset + start + 1 + end) => {
                    return Err(InsertError::TooManyParams);
                }
                _ => {}
            }
        }

        return Ok(Some((&path[start..], start)));
    }

    Ok(None)
}
