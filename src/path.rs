//! Path normalization, joining, and classification utilities.
//!
//! These are the leaves of the system: no other module depends on tree
//! state to do this work, and every routine here operates on plain byte
//! slices the way `examples/HFQR-xitca-web/router/src/tree.rs`'s
//! `find_wildcard` does.

/// Returns the number of `:name`/`*name` wildcard segments in `pattern`.
///
/// Used by [`crate::engine::Engine`] to track `max_params` so pooled
/// [`crate::context::Context`] param buffers can be pre-sized.
pub fn count_params(pattern: &str) -> usize {
    let bytes = pattern.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b':' | b'*' if i == 0 || bytes[i - 1] != b'\\' => count += 1,
            _ => {}
        }
        i += 1;
    }
    count
}

/// Returns the number of `/`-separated sections in `pattern`, used to
/// pre-size the lookup's skipped-node scratch capacity (`max_sections`).
pub fn count_sections(pattern: &str) -> usize {
    pattern.bytes().filter(|&b| b == b'/').count().max(1)
}

/// Joins a router group's base path with a relative path the way
/// `Group(relativePath)` does: collapses the seam between the two so a
/// trailing `/` on `base` and a leading `/` on `relative` don't double up,
/// but a caller-supplied trailing `/` on `relative` is preserved.
pub fn join_paths(base: &str, relative: &str) -> String {
    if relative.is_empty() {
        return base.to_string();
    }

    let joined = format!("{}/{}", base.trim_end_matches('/'), relative.trim_start_matches('/'));
    let final_slash = relative.ends_with('/') && !joined.ends_with('/');

    let mut cleaned = clean_path(&joined);
    if final_slash && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

/// Cleans a URL path the way the dispatcher's `RemoveExtraSlash` flag
/// does: collapses repeated `/`, resolves `.` and `..` segments, and
/// guarantees a leading `/`. An empty input becomes `/`.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let rooted = path.starts_with('/');
    let trailing_slash = path.len() > 1 && path.ends_with('/');

    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                out.pop();
            }
            seg => out.push(seg),
        }
    }

    let mut cleaned = String::with_capacity(path.len());
    if rooted {
        cleaned.push('/');
    }
    cleaned.push_str(&out.join("/"));
    if trailing_slash && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    if cleaned.is_empty() {
        cleaned.push('/');
    }
    cleaned
}

/// Filters a header value (e.g. `X-Forwarded-Prefix`) down to characters
/// safe to prepend onto a redirect `Location`, dropping anything that
/// could be used to smuggle a second path or CRLF-inject into the header.
pub fn filter_safe_path_chars(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~'))
        .collect()
}
