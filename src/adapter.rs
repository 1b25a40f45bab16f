//! The adapter contract.
//!
//! [`HttpAdapter`] is the full method surface the routing framework requires
//! from a runtime binding. Every operation either delegates to the runtime's
//! instance bridge or fails with a tagged [`AdapterError::NotSupported`] —
//! never a silent no-op that could mask a behavior difference between
//! runtimes.
//!
//! The trait is object-safe: the framework holds a `Box<dyn HttpAdapter>`
//! and drives either runtime interchangeably.

use std::net::SocketAddr;
use std::path::PathBuf;

use http::StatusCode;

use crate::context::{ReplyPayload, Request, Response};
use crate::cors::CorsOptions;
use crate::error::AdapterError;
use crate::handler::{BoxFuture, ErrorHandler, RouteHandler};

/// Invoked exactly once when the listener is ready to accept connections.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Registers one middleware for the route pattern it is given; obtained from
/// [`HttpAdapter::create_middleware_factory`].
pub type MiddlewareFactory = Box<dyn Fn(&str, RouteHandler) -> Result<(), AdapterError> + Send + Sync>;

/// The request methods the contract routes on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Matches every method; checked after the exact-method routes.
    All,
}

impl RequestMethod {
    /// The wire method this registration targets; `None` for [`RequestMethod::All`].
    pub fn as_http(self) -> Option<http::Method> {
        match self {
            Self::Get => Some(http::Method::GET),
            Self::Post => Some(http::Method::POST),
            Self::Put => Some(http::Method::PUT),
            Self::Patch => Some(http::Method::PATCH),
            Self::Delete => Some(http::Method::DELETE),
            Self::Head => Some(http::Method::HEAD),
            Self::Options => Some(http::Method::OPTIONS),
            Self::All => None,
        }
    }

    /// Whether a wire method matches this registration.
    pub fn matches(self, method: &http::Method) -> bool {
        match self.as_http() {
            Some(m) => m == *method,
            None => true,
        }
    }
}

/// What happens to in-flight requests when [`HttpAdapter::close`] is called.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ShutdownMode {
    /// In-flight connections run to completion; idle keep-alive connections
    /// are asked to close. The socket is released before `close()` resolves.
    #[default]
    Drain,
    /// Connection tasks are aborted. The socket is still released before
    /// `close()` resolves.
    Immediate,
}

/// TLS material carried through `init_http_server`. Neither runtime binding
/// terminates TLS itself; `listen` rejects these options as unsupported.
#[derive(Clone)]
pub struct HttpsOptions {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Server options bound before `listen`.
#[derive(Clone, Default)]
pub struct ServerOptions {
    pub https: Option<HttpsOptions>,
    pub shutdown: ShutdownMode,
}

/// Static-asset serving configuration.
#[derive(Clone)]
pub struct StaticAssetsOptions {
    /// URL prefix the assets are served under; stripped before resolving
    /// against `root`. Requests outside the prefix fall through to routing.
    pub prefix: String,
    /// Local directory files are resolved against.
    pub root: PathBuf,
    /// Serve `index.html` for directory requests.
    pub serve_index: bool,
}

impl StaticAssetsOptions {
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into(), root: root.into(), serve_index: true }
    }
}

/// The contract a runtime binding implements for the routing framework.
///
/// Registration methods are valid during bootstrap only (before `listen`);
/// they fail with [`AdapterError::Lifecycle`] afterwards. The per-instance
/// state machine is `Created → Initialized → Listening → Closed`; a closed
/// adapter never listens again — create a fresh instance instead.
pub trait HttpAdapter: Send + Sync {
    /// Stable identifier for the runtime backing this adapter.
    fn get_type(&self) -> &'static str;

    /// Binds server options (TLS material, shutdown mode) before `listen`.
    fn init_http_server(&self, options: ServerOptions) -> Result<(), AdapterError>;

    /// Starts the listener on `(hostname, port)` and resolves once the serve
    /// task is running. `ready` is invoked exactly once, after a successful
    /// bind. A bind failure is returned, which the framework treats as fatal
    /// to startup.
    fn listen(
        &self,
        port: u16,
        hostname: Option<String>,
        ready: Option<ReadyCallback>,
    ) -> BoxFuture<Result<(), AdapterError>>;

    /// Stops the listener. Resolves only after the socket is released, so a
    /// subsequent `listen` on the same port cannot race an in-flight
    /// shutdown. In-flight request behavior follows [`ShutdownMode`].
    fn close(&self) -> BoxFuture<Result<(), AdapterError>>;

    /// The actually bound socket address while listening.
    fn address(&self) -> Option<SocketAddr>;

    /// Registers a route. `path` uses `:name` placeholders.
    fn route(
        &self,
        method: RequestMethod,
        path: &str,
        handler: RouteHandler,
    ) -> Result<(), AdapterError>;

    fn get(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Get, path, handler)
    }

    fn post(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Post, path, handler)
    }

    fn put(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Put, path, handler)
    }

    fn patch(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Patch, path, handler)
    }

    fn delete(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Delete, path, handler)
    }

    fn head(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Head, path, handler)
    }

    fn options(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::Options, path, handler)
    }

    fn all(&self, path: &str, handler: RouteHandler) -> Result<(), AdapterError> {
        self.route(RequestMethod::All, path, handler)
    }

    /// Registers middleware, globally or scoped to a path prefix. Execution
    /// order is registration order; prefixed middleware only runs for
    /// matching requests.
    fn use_middleware(
        &self,
        prefix: Option<&str>,
        middleware: RouteHandler,
    ) -> Result<(), AdapterError>;

    /// Registers the runtime's body-parsing stage for a prefix. Both
    /// bindings buffer bodies uniformly, so this is either a pass-through
    /// prefix middleware (hyper) or a documented no-op (axum).
    fn register_parser_middleware(
        &self,
        prefix: Option<&str>,
        raw_body: bool,
    ) -> Result<(), AdapterError>;

    /// A factory the framework uses to register method-scoped middleware for
    /// already-resolved route patterns.
    fn create_middleware_factory(
        &self,
        method: RequestMethod,
    ) -> Result<MiddlewareFactory, AdapterError>;

    /// Installs the single error handler. Last registration wins. A path
    /// prefix is rejected when the runtime has no path-scoped error facility.
    fn set_error_handler(
        &self,
        handler: ErrorHandler,
        prefix: Option<&str>,
    ) -> Result<(), AdapterError>;

    /// Installs the single not-found handler. Last registration wins. The
    /// continuation handed to the handler must never be invoked; doing so
    /// raises an internal implementation error.
    fn set_not_found_handler(
        &self,
        handler: RouteHandler,
        prefix: Option<&str>,
    ) -> Result<(), AdapterError>;

    /// Translates the CORS specification onto the runtime's CORS middleware.
    fn enable_cors(&self, options: CorsOptions, prefix: Option<&str>)
    -> Result<(), AdapterError>;

    /// Serves files beneath a URL prefix; non-matching requests fall through
    /// to routing.
    fn use_static_assets(&self, options: StaticAssetsOptions) -> Result<(), AdapterError>;

    /// View engines are unsupported on both runtimes.
    fn set_view_engine(&self, engine: &str) -> Result<(), AdapterError>;

    /// Template rendering is unsupported on both runtimes.
    fn render(&self, response: &Response, view: &str) -> Result<(), AdapterError>;

    /// Route versioning is unsupported on both runtimes.
    fn apply_version_filter(
        &self,
        handler: RouteHandler,
        version: &str,
    ) -> Result<RouteHandler, AdapterError>;

    // ── Request accessors ─────────────────────────────────────────────────────

    /// The request method, lower-cased as the framework expects.
    fn request_method(&self, request: &Request) -> String {
        request.method().as_str().to_ascii_lowercase()
    }

    /// The request path (no query string).
    fn request_url(&self, request: &Request) -> String {
        request.path().to_owned()
    }

    fn request_hostname(&self, request: &Request) -> Option<String> {
        request.hostname()
    }

    // ── Response delegation ───────────────────────────────────────────────────

    fn set_header(&self, response: &Response, name: &str, value: &str) -> Result<(), AdapterError> {
        response.set_header(name, value)
    }

    fn append_header(
        &self,
        response: &Response,
        name: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        response.append_header(name, value)
    }

    fn get_header(&self, response: &Response, name: &str) -> Option<String> {
        response.header(name)
    }

    fn is_headers_sent(&self, response: &Response) -> bool {
        response.headers_sent()
    }

    fn status(&self, response: &Response, status: StatusCode) {
        response.set_status(status);
    }

    /// Writes the response: status first when given, then the body per its
    /// payload type.
    fn reply(
        &self,
        response: &Response,
        body: Option<ReplyPayload>,
        status: Option<StatusCode>,
    ) -> Result<(), AdapterError> {
        response.reply(body, status)
    }

    fn end(&self, response: &Response, message: Option<String>) {
        response.end(message);
    }

    fn redirect(
        &self,
        response: &Response,
        status: StatusCode,
        url: &str,
    ) -> Result<(), AdapterError> {
        response.redirect(status, url)
    }
}
