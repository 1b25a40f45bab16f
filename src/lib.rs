//! Continuation-style HTTP adapters bridging a routing framework onto hyper
//! and axum.
//!
//! A routing framework that wants to run on more than one HTTP runtime needs
//! a seam: one contract it programs against, and per-runtime bindings that
//! translate it. [`HttpAdapter`] is that contract. Handlers are written once,
//! in the 3-argument continuation shape (`req`, `res`, `next`), and run
//! unchanged on either binding:
//!
//! - [`HyperAdapter`] drives hyper directly — its own accept loop, route
//!   table, and middleware chain.
//! - [`AxumAdapter`] freezes the registrations into an `axum::Router` and
//!   lets axum (and tower-http, for CORS and static assets) drive.
//!
//! Capabilities the underlying runtime cannot provide fail loudly at
//! registration time with [`AdapterError::NotSupported`]; nothing is
//! silently dropped.
//!
//! # Example
//!
//! ```no_run
//! use trestle::{AxumAdapter, HttpAdapter, route_handler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), trestle::AdapterError> {
//!     let adapter = AxumAdapter::new();
//!
//!     adapter.get("/api/greet", route_handler(|_req, res, _next| async move {
//!         res.reply(Some("Hello Deno!".into()), None)
//!     }))?;
//!
//!     adapter.listen(8080, None, Some(Box::new(|| println!("ready")))).await?;
//!     // ... later:
//!     adapter.close().await?;
//!     Ok(())
//! }
//! ```

mod adapter;
mod context;
mod cors;
mod error;
mod handler;
mod path;
mod platform_axum;
mod platform_hyper;
mod registry;

pub use adapter::{
    HttpAdapter, HttpsOptions, MiddlewareFactory, ReadyCallback, RequestMethod, ServerOptions,
    ShutdownMode, StaticAssetsOptions,
};
pub use context::{ReplyPayload, Request, Response};
pub use cors::{CorsOptions, CorsOrigin, ValueList};
pub use error::AdapterError;
pub use handler::{BoxFuture, ErrorHandler, Next, RouteHandler, error_handler, route_handler};
pub use platform_axum::AxumAdapter;
pub use platform_hyper::HyperAdapter;
