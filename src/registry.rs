//! Bootstrap registry and lifecycle state shared by both bridges.
//!
//! The two runtime bindings are structurally identical adapters differing in
//! the primitives they delegate to, so the bookkeeping that does not differ
//! lives here: the append-only route/middleware registrations, the
//! single-slot error and not-found handlers, and the
//! `Created → Initialized → Listening → Closed` state machine.
//!
//! Registrations are only read at `listen()` time, as an immutable
//! [`Snapshot`] the serve task owns for its lifetime.

use std::net::SocketAddr;
use std::sync::Mutex;

use crate::adapter::{RequestMethod, ServerOptions, StaticAssetsOptions};
use crate::cors::CorsConfig;
use crate::error::AdapterError;
use crate::handler::{ErrorHandler, RouteHandler};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Lifecycle {
    Created,
    Initialized,
    Listening,
    Closed,
}

/// One middleware registration, in registration order.
#[derive(Clone)]
pub(crate) enum MiddlewareReg {
    /// Plain continuation middleware, optionally scoped to a path prefix.
    Plain { prefix: Option<String>, handler: RouteHandler },
    /// Middleware scoped to a method and a route pattern (from the
    /// middleware factory).
    Routed { method: RequestMethod, pattern: String, handler: RouteHandler },
    /// CORS middleware (axum binding only).
    Cors(CorsConfig),
    /// Static-asset middleware (axum binding only).
    Static(StaticAssetsOptions),
}

#[derive(Default)]
struct Registrations {
    routes: Vec<(RequestMethod, String, RouteHandler)>,
    middleware: Vec<MiddlewareReg>,
    error_handler: Option<ErrorHandler>,
    not_found: Option<(Option<String>, RouteHandler)>,
    options: ServerOptions,
}

/// Immutable copy of the registrations, taken at `listen()`.
#[derive(Clone)]
pub(crate) struct Snapshot {
    pub routes: Vec<(RequestMethod, String, RouteHandler)>,
    pub middleware: Vec<MiddlewareReg>,
    pub error_handler: Option<ErrorHandler>,
    pub not_found: Option<(Option<String>, RouteHandler)>,
    pub options: ServerOptions,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("routes", &self.routes.len())
            .field("middleware", &self.middleware.len())
            .field("error_handler", &self.error_handler.is_some())
            .field("not_found", &self.not_found.is_some())
            .finish_non_exhaustive()
    }
}

/// The bridge-shared half of an adapter instance.
pub(crate) struct Core {
    lifecycle: Mutex<Lifecycle>,
    registrations: Mutex<Registrations>,
    bound: Mutex<Option<SocketAddr>>,
}

impl Core {
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Created),
            registrations: Mutex::new(Registrations::default()),
            bound: Mutex::new(None),
        }
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registrations(&self) -> std::sync::MutexGuard<'_, Registrations> {
        self.registrations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fails unless the instance is still in bootstrap (pre-`listen`).
    pub fn require_bootstrap(&self, what: &'static str) -> Result<(), AdapterError> {
        match *self.lifecycle() {
            Lifecycle::Created | Lifecycle::Initialized => Ok(()),
            Lifecycle::Listening | Lifecycle::Closed => Err(AdapterError::Lifecycle(what)),
        }
    }

    pub fn set_options(&self, options: ServerOptions) -> Result<(), AdapterError> {
        self.require_bootstrap("init_http_server() must be called before listen()")?;
        self.registrations().options = options;
        *self.lifecycle() = Lifecycle::Initialized;
        Ok(())
    }

    pub fn add_route(
        &self,
        method: RequestMethod,
        path: &str,
        handler: RouteHandler,
    ) -> Result<(), AdapterError> {
        self.require_bootstrap("routes must be registered before listen()")?;
        self.registrations().routes.push((method, path.to_owned(), handler));
        Ok(())
    }

    pub fn add_middleware(&self, registration: MiddlewareReg) -> Result<(), AdapterError> {
        self.require_bootstrap("middleware must be registered before listen()")?;
        self.registrations().middleware.push(registration);
        Ok(())
    }

    /// Single-slot registration: a later handler replaces an earlier one.
    pub fn set_error_handler(&self, handler: ErrorHandler) -> Result<(), AdapterError> {
        self.require_bootstrap("an error handler must be registered before listen()")?;
        self.registrations().error_handler = Some(handler);
        Ok(())
    }

    /// Single-slot registration: a later handler replaces an earlier one.
    pub fn set_not_found_handler(
        &self,
        prefix: Option<String>,
        handler: RouteHandler,
    ) -> Result<(), AdapterError> {
        self.require_bootstrap("a not-found handler must be registered before listen()")?;
        self.registrations().not_found = Some((prefix, handler));
        Ok(())
    }

    /// Takes the registration snapshot for `listen()`. Fails on re-listen and
    /// on closed instances; TLS material is rejected here because neither
    /// runtime binding terminates TLS.
    pub fn begin_listen(&self, adapter: &'static str) -> Result<Snapshot, AdapterError> {
        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::Created | Lifecycle::Initialized => {}
                Lifecycle::Listening => {
                    return Err(AdapterError::Lifecycle("listen() may only be called once"));
                }
                Lifecycle::Closed => {
                    return Err(AdapterError::Lifecycle(
                        "a closed adapter cannot listen again; create a fresh instance",
                    ));
                }
            }
            *lifecycle = Lifecycle::Listening;
        }

        let registrations = self.registrations();
        if registrations.options.https.is_some() {
            *self.lifecycle() = Lifecycle::Closed;
            return Err(AdapterError::NotSupported { method: adapter, feature: "TLS termination" });
        }
        Ok(Snapshot {
            routes: registrations.routes.clone(),
            middleware: registrations.middleware.clone(),
            error_handler: registrations.error_handler.clone(),
            not_found: registrations.not_found.clone(),
            options: registrations.options.clone(),
        })
    }

    /// A bind failure after `begin_listen`; the instance stays unusable.
    pub fn abort_listen(&self) {
        *self.lifecycle() = Lifecycle::Closed;
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn mark_bound(&self, addr: SocketAddr) {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);
    }

    /// `Listening → Closed`; anything else is a lifecycle error.
    pub fn begin_close(&self) -> Result<(), AdapterError> {
        let mut lifecycle = self.lifecycle();
        if *lifecycle != Lifecycle::Listening {
            return Err(AdapterError::Lifecycle("close() is only valid while listening"));
        }
        *lifecycle = Lifecycle::Closed;
        Ok(())
    }

    pub fn mark_closed(&self) {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn address(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::route_handler;

    fn noop_handler() -> RouteHandler {
        route_handler(|_req, _res, _next| async { Ok(()) })
    }

    #[test]
    fn registrations_are_rejected_after_listen() {
        let core = Core::new();
        core.add_route(RequestMethod::Get, "/x", noop_handler()).unwrap();
        let snapshot = core.begin_listen("test").unwrap();
        assert_eq!(snapshot.routes.len(), 1);

        let err = core.add_route(RequestMethod::Get, "/y", noop_handler()).unwrap_err();
        assert!(matches!(err, AdapterError::Lifecycle(_)));
    }

    #[test]
    fn listen_twice_is_a_lifecycle_error() {
        let core = Core::new();
        core.begin_listen("test").unwrap();
        assert!(matches!(core.begin_listen("test"), Err(AdapterError::Lifecycle(_))));
    }

    #[test]
    fn close_is_only_valid_while_listening() {
        let core = Core::new();
        assert!(matches!(core.begin_close(), Err(AdapterError::Lifecycle(_))));

        core.begin_listen("test").unwrap();
        core.begin_close().unwrap();
        assert!(matches!(core.begin_close(), Err(AdapterError::Lifecycle(_))));
        assert!(matches!(core.begin_listen("test"), Err(AdapterError::Lifecycle(_))));
    }

    #[test]
    fn error_handler_slot_is_last_write_wins() {
        let core = Core::new();
        core.set_error_handler(crate::handler::error_handler(|_e, _req, _res, _n| async {
            Ok(())
        }))
        .unwrap();
        core.set_error_handler(crate::handler::error_handler(|_e, _req, _res, _n| async {
            Ok(())
        }))
        .unwrap();
        let snapshot = core.begin_listen("test").unwrap();
        assert!(snapshot.error_handler.is_some());
    }

    #[test]
    fn tls_options_are_rejected_at_listen() {
        let core = Core::new();
        core.set_options(ServerOptions {
            https: Some(crate::adapter::HttpsOptions { cert: vec![], key: vec![] }),
            ..Default::default()
        })
        .unwrap();
        let err = core.begin_listen("HyperAdapter::listen").unwrap_err();
        assert!(matches!(err, AdapterError::NotSupported { .. }));
    }
}
