//! Path-prefix matching of intercepted requests to registered sources.

/// Canonicalize a registration prefix: leading and trailing `/`.
pub fn canonicalize_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 2);
    if !prefix.starts_with('/') {
        out.push('/');
    }
    out.push_str(prefix);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// Match a request path against a canonical prefix.
///
/// Returns the non-empty remainder after the prefix, or `None` when the
/// prefix does not apply. The bare prefix itself (empty remainder) is not
/// a file request.
pub fn match_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let rel = path.strip_prefix(prefix)?;
    if rel.is_empty() {
        return None;
    }
    Some(rel)
}

/// Strip scheme and authority from an absolute URL, leaving the path.
///
/// Already-relative paths pass through unchanged; a query string is cut.
pub fn url_path(url: &str) -> &str {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest.find('/').map(|i| &rest[i..]).unwrap_or("/"))
        .unwrap_or(url);
    without_scheme
        .split_once('?')
        .map(|(path, _)| path)
        .unwrap_or(without_scheme)
}
