//! Unified error type.
//!
//! The taxonomy matters more than the shape: tests (and the framework's
//! bootstrap sequence) need to tell an unsupported capability apart from an
//! internal bug, and both apart from an ordinary failing request. Each class
//! gets its own variant so `matches!` assertions stay cheap.

use http::StatusCode;

/// The error type returned by trestle's fallible operations.
///
/// Request-level failures (404, 422, etc.) travel as [`AdapterError::Http`]
/// through the middleware chain to the registered error handler. Everything
/// else surfaces at bootstrap, before the server accepts traffic.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// A capability the underlying runtime cannot provide. Raised
    /// synchronously at registration time, never deferred to request time.
    #[error("{method}: {feature} is not supported")]
    NotSupported {
        /// The adapter method that was called, e.g. `"HyperAdapter::enable_cors"`.
        method: &'static str,
        /// The unsupported feature, e.g. `"a path prefix"`.
        feature: &'static str,
    },

    /// An invariant the adapter itself must never violate. Seeing this
    /// outside a test that deliberately misuses the API is a bug in trestle.
    #[error("[BUG] {0}")]
    Implementation(String),

    /// An operation was called in the wrong lifecycle state, e.g. `listen()`
    /// twice, or a route registered after the server started.
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(&'static str),

    /// An error raised by a route handler or middleware, carrying the HTTP
    /// status the response should get if no error handler intervenes.
    #[error("http {status}: {message}")]
    Http { status: StatusCode, message: String },

    /// A route path the router rejected (bad pattern, duplicate).
    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    /// A header name or value that is not valid HTTP.
    #[error("invalid header: {0}")]
    Header(String),

    /// Body deserialization failure.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Shorthand for the 404 flavor of [`AdapterError::Http`] that drives
    /// not-found handling.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Http { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    /// An [`AdapterError::Http`] with an arbitrary status.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    pub(crate) fn implementation(message: impl Into<String>) -> Self {
        Self::Implementation(message.into())
    }

    pub(crate) fn not_supported(method: &'static str, feature: &'static str) -> Self {
        Self::NotSupported { method, feature }
    }

    /// True for the 404 flavor that the not-found handler intercepts.
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// The status a default (no error handler installed) response should use.
    pub(crate) fn response_status(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The body a default response should carry: the bare message for
    /// request-level errors, the tagged rendering for everything else.
    pub(crate) fn response_body(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let e = AdapterError::not_found("Cannot GET /nope");
        assert!(e.is_not_found());
        assert_eq!(e.response_status(), StatusCode::NOT_FOUND);

        let e = AdapterError::http(StatusCode::IM_A_TEAPOT, "teapot");
        assert!(!e.is_not_found());
        assert_eq!(e.response_status(), StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn implementation_errors_are_tagged() {
        let e = AdapterError::implementation("next() was unexpectedly called");
        assert!(e.to_string().starts_with("[BUG]"));
        assert_eq!(e.response_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_supported_names_method_and_feature() {
        let e = AdapterError::not_supported("HyperAdapter::enable_cors", "CORS");
        assert_eq!(e.to_string(), "HyperAdapter::enable_cors: CORS is not supported");
    }
}
