//! Route path translation.
//!
//! The framework hands the adapter express-style patterns (`/tags/:id`,
//! trailing `*`). Both runtimes' routers (matchit directly, and the one
//! inside axum) want `{name}` placeholders and `{*name}` wildcards, so the
//! translation happens once at the registration boundary.

/// Translates a `:name` / `*` pattern into router `{name}` syntax.
///
/// Paths already written in `{name}` syntax pass through unchanged.
pub(crate) fn to_router_pattern(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        if let Some(name) = segment.strip_prefix(':') {
            out.push('{');
            out.push_str(name);
            out.push('}');
        } else if segment == "*" {
            out.push_str("{*rest}");
        } else {
            out.push_str(segment);
        }
    }
    out
}

/// Fails fast at registration time on patterns the routers would reject at
/// `listen()`.
pub(crate) fn validate_pattern(path: &str) -> Result<(), crate::error::AdapterError> {
    let mut probe = matchit::Router::new();
    probe.insert(to_router_pattern(path), ()).map_err(|e| crate::error::AdapterError::Route {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

/// True when `path` lies under `prefix` on a segment boundary. An empty or
/// `/` prefix matches everything.
pub(crate) fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Strips `prefix` from `path`, keeping a leading slash on the remainder.
pub(crate) fn strip_prefix<'a>(prefix: &str, path: &'a str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}
