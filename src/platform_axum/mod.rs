//! The axum runtime binding.
//!
//! Registrations are frozen into an `axum::Router` at `listen()`; CORS and
//! static assets ride the tower-http layers axum is built for. The
//! capability trade against the hyper binding: CORS and static assets are
//! supported here, prefix-scoped not-found handlers are not.

mod bridge;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapter::{
    HttpAdapter, MiddlewareFactory, ReadyCallback, RequestMethod, ServerOptions,
    StaticAssetsOptions,
};
use crate::context::Response;
use crate::cors::{CorsOptions, normalize};
use crate::error::AdapterError;
use crate::handler::{BoxFuture, ErrorHandler, RouteHandler};
use crate::path::validate_pattern;
use crate::registry::MiddlewareReg;

use bridge::AxumBridge;

/// [`HttpAdapter`] backed by axum.
pub struct AxumAdapter {
    bridge: Arc<AxumBridge>,
}

impl AxumAdapter {
    pub fn new() -> Self {
        Self { bridge: Arc::new(AxumBridge::new()) }
    }
}

impl Default for AxumAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpAdapter for AxumAdapter {
    fn get_type(&self) -> &'static str {
        "axum"
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
        _prefix: Option<&str>,
        _raw_body: bool,
    ) -> Result<(), AdapterError> {
        // The context layer buffers every body before any stage runs; there
        // is no separate parser stage to install on this runtime.
        Ok(())
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
                "AxumAdapter::set_error_handler",
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
        if prefix.is_some() {
            return Err(AdapterError::not_supported(
                "AxumAdapter::set_not_found_handler",
                "a path prefix",
            ));
        }
        self.bridge.core.set_not_found_handler(None, handler)
    }

    fn enable_cors(
        &self,
        options: CorsOptions,
        prefix: Option<&str>,
    ) -> Result<(), AdapterError> {
        if prefix.is_some() {
            return Err(AdapterError::not_supported(
                "AxumAdapter::enable_cors",
                "a path prefix",
            ));
        }
        let config = normalize(&options)?;
        self.bridge.core.add_middleware(MiddlewareReg::Cors(config))
    }

    fn use_static_assets(&self, options: StaticAssetsOptions) -> Result<(), AdapterError> {
        self.bridge.core.add_middleware(MiddlewareReg::Static(options))
    }

    fn set_view_engine(&self, _engine: &str) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported("AxumAdapter::set_view_engine", "view engines"))
    }

    fn render(&self, _response: &Response, _view: &str) -> Result<(), AdapterError> {
        Err(AdapterError::not_supported("AxumAdapter::render", "template rendering"))
    }

    fn apply_version_filter(
        &self,
        _handler: RouteHandler,
        _version: &str,
    ) -> Result<RouteHandler, AdapterError> {
        Err(AdapterError::not_supported(
            "AxumAdapter::apply_version_filter",
            "route versioning",
        ))
    }
}
