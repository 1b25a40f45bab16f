//! The hyper runtime binding.
//!
//! This binding drives hyper directly: its own accept loop, its own matchit
//! route table, its own continuation chain. It is the smaller of the two
//! bindings capability-wise — no CORS and no static-asset middleware, both
//! rejected as unsupported at registration time — but it supports
//! prefix-scoped not-found handlers, which the axum binding does not.

mod bridge;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapter::{
    HttpAdapter, MiddlewareFactory, ReadyCallback, RequestMethod, ServerOptions,
    StaticAssetsOptions,
};
use crate::context::Response;
use crate::cors::CorsOptions;
use crate::error::AdapterError;
use crate::handler::{BoxFuture, ErrorHandler, RouteHandler};
use crate::path::validate_pattern;
use crate::registry::MiddlewareReg;

use bridge::HyperBridge;

/// [`HttpAdapter`] backed by hyper.
pub struct HyperAdapter {
    bridge: Arc<HyperBridge>,
}

impl HyperAdapter {
    pub fn new() -> Self {
        Self { bridge: Arc::new(HyperBridge::new()) }
    }
}

impl Default for HyperAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAdapter for HyperAdapter {
    fn get_type(&self) -> &'static str {
        "hyper"
    }

    fn init_http_server(&self, options: ServerOptions) -> Result<(), AdapterError> {
        self.bridge.core.set_options(options)
    }

    fn listen(
        &self,
        port: u16,
        hostname: Option<String>,
        ready: Option<ReadyCallback>,
    ) -> BoxFuture<Result<(), AdapterError>> {
        let bridge = Arc::clone(&self.bridge);
        Box::pin(async move { bridge.listen(port, hostname, ready).await })
    }

    fn close(&self) -> BoxFuture<Result<(), AdapterError>> {
        let bridge = Arc::clone(&self.bridge);
        Box::pin(async move { bridge.close().await })
    }

    fn address(&self) -> Option<SocketAddr> {
        self.bridge.core.address()
    }

    fn route(
        &self,
        method: RequestMethod,
        path: &str,
        handler: RouteHandler,
    ) -> Result<(), AdapterError> {
        validate_pattern(path)?;
        self.bridge.core.add_route(method, path, handler)
    }

    fn use_middleware(
        &self,
        prefix: Option<&str>,
        middleware: RouteHandler,
    ) -> Result<(), AdapterError> {
        self.bridge.core.add_middleware(MiddlewareReg::Plain {
            prefix: prefix.map(str::to_owned),
            handler: middleware,
        })
    }

    fn register_parser_middleware(
        &self,
        prefix: Option<&str>,
        _raw_body: bool,
    ) -> Result<(), AdapterError> {
        let Some(prefix) = prefix else {
            return Err(AdapterError::implementation(
                "register_parser_middleware requires a path prefix",
            ));
        };
        // Bodies are buffered before the chain runs, so the parser stage is a
        // pass-through; it still occupies its registration slot so execution
        // order stays observable.
        self.use_middleware(
            Some(prefix),
            crate::handler::route_handler(|_req, _res, next| async move { next.run().await }),
        )
    }

    fn create_middleware_factory(
        &self,
        method: RequestMethod,
    ) -> Result<MiddlewareFactory, AdapterError> {
        let bridge = Arc::clone(&self.bridge);
        Ok(Box::new(move |pattern: &str, handler: RouteHandler| {
            validate_pattern(pattern)?;
            bridge.core.add_middleware(MiddlewareReg::Routed {
                method,
                pattern: pattern.to_owned(),
                handler,
            })
        }))
    }

    fn set_error_handler(
        &self,
        handler: ErrorHandler,
        prefix: Option<&str>,
    ) -> Result<(), AdapterError> {
        if prefix.is_some() {
            return Err(AdapterError::not_supported(
                "HyperAdapter::set_error_handler",
                "a path prefix",
            ));
        }
        self.bridge.core.set_error_handler(handler)
    }

    fn set_not_found_handler(
        &self,
        handler: RouteHandler,
        prefix: Option<&str>,
    ) -> Result<(), AdapterError> {
        self.bridge.core.set_not_found_handler(prefix.map(str::to_owned), handler)
    }

    fn enable_cors(
        &self,
        _options: CorsOptions,
        _prefix: Option<&str>,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported("HyperAdapter::enable_cors", "CORS middleware"))
    }

    fn use_static_assets(&self, _options: StaticAssetsOptions) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported(
            "HyperAdapter::use_static_assets",
            "static asset serving",
        ))
    }

    fn set_view_engine(&self, _engine: &str) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported("HyperAdapter::set_view_engine", "view engines"))
    }

    fn render(&self, _response: &Response, _view: &str) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported("HyperAdapter::render", "template rendering"))
    }

    fn apply_version_filter(
        &self,
        _handler: RouteHandler,
        _version: &str,
    ) -> Result<RouteHandler, AdapterError> {
        Err(AdapterError::not_supported(
            "HyperAdapter::apply_version_filter",
            "route versioning",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::route_handler;

    fn noop() -> RouteHandler {
        route_handler(|_req, _res, _next| async { Ok(()) })
    }

    #[test]
    fn unsupported_capabilities_are_tagged() {
        let adapter = HyperAdapter::new();
        assert!(matches!(
            adapter.enable_cors(CorsOptions::default(), None),
            Err(AdapterError::NotSupported { .. })
        ));
        assert!(matches!(
            adapter.use_static_assets(StaticAssetsOptions::new("/assets", "/tmp")),
            Err(AdapterError::NotSupported { .. })
        ));
        assert!(matches!(
            adapter.set_view_engine("hbs"),
            Err(AdapterError::NotSupported { .. })
        ));
        assert!(matches!(
            adapter.apply_version_filter(noop(), "1"),
            Err(AdapterError::NotSupported { .. })
        ));
    }

    #[test]
    fn prefixed_error_handler_is_rejected() {
        let adapter = HyperAdapter::new();
        let err = adapter
            .set_error_handler(
                crate::handler::error_handler(|_e, _req, _res, _n| async { Ok(()) }),
                Some("/api"),
            )
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotSupported { .. }));
    }

    #[test]
    fn prefixed_not_found_handler_is_accepted() {
        let adapter = HyperAdapter::new();
        adapter.set_not_found_handler(noop(), Some("/api")).unwrap();
    }

    #[test]
    fn parser_middleware_requires_a_prefix() {
        let adapter = HyperAdapter::new();
        assert!(matches!(
            adapter.register_parser_middleware(None, false),
            Err(AdapterError::Implementation(_))
        ));
        adapter.register_parser_middleware(Some("/api"), false).unwrap();
    }

    #[test]
    fn bad_route_patterns_fail_at_registration() {
        let adapter = HyperAdapter::new();
        assert!(adapter.get("/tags/:id", noop()).is_ok());
        assert!(matches!(
            adapter.get("/tags/{id", noop()),
            Err(AdapterError::Route { .. })
        ));
    }
}
