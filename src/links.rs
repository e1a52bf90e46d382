//! Matching of Smartsheet permalinks.
//!
//! Intake rows hold links that users copied from their browsers, so they may carry query strings
//! or be shortened differently than the permalink reported by the API. We match on the tail of
//! the link that starts with the object kind, e.g. `sheets/abc123` or `workspaces/xyz`.

pub(crate) const SHEETS: &str = "sheets";
pub(crate) const WORKSPACES: &str = "workspaces";

/// Strips a `?` and everything after it.
pub fn remove_query_string(s: &str) -> &str {
    match s.split_once('?') {
        Some((head, _)) => head,
        None => s,
    }
}

/// Returns the part of `link` that begins with `<kind>/`, with a single trailing `*` wildcard
/// removed. `None` if `link` has no such segment or nothing follows it.
pub fn pattern_tail<'a>(link: &'a str, kind: &str) -> Option<&'a str> {
    let needle = format!("{kind}/");
    let start = link.find(&needle)?;
    let tail = &link[start..];
    let tail = tail.strip_suffix('*').unwrap_or(tail);
    if tail.len() <= needle.len() {
        return None;
    }
    Some(tail)
}

/// True when the `<kind>/...` tail of `link` appears in `permalink`.
pub fn is_pattern_substring(link: &str, permalink: &str, kind: &str) -> bool {
    match pattern_tail(link, kind) {
        Some(tail) => permalink.contains(tail),
        None => false,
    }
}

/// True when `link` points at a workspace rather than a sheet.
pub fn is_workspace_link(link: &str) -> bool {
    pattern_tail(link, WORKSPACES).is_some()
}
