//! Handler types and the continuation (`next`) mechanism.
//!
//! # How framework handlers are stored
//!
//! The bridges need to hold handlers of *different* concrete types in one
//! registry, so handlers are type-erased behind `Arc<dyn Fn(..)>`. The
//! framework's handler shape is the 3-argument continuation style:
//!
//! ```text
//! async fn handler(req: Arc<Request>, res: Arc<Response>, next: Next)
//!     -> Result<(), AdapterError>
//! ```
//!
//! Error handlers are the 4-argument shape — a distinct type, so a normal
//! handler can never be registered where an error handler is required (the
//! "arity" check the contract demands, enforced at compile time).
//!
//! The only runtime cost per request is one `Arc` clone per chain stage plus
//! one virtual call — negligible compared to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Request, Response};
use crate::error::AdapterError;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime must poll the future in place; `Send`
/// so tokio may move it across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A route handler or middleware in the framework's 3-argument shape.
pub type RouteHandler =
    Arc<dyn Fn(Arc<Request>, Arc<Response>, Next) -> BoxFuture<Result<(), AdapterError>> + Send + Sync>;

/// An error handler in the framework's 4-argument shape.
///
/// The trailing [`Next`] is always a no-op: the framework's error-handling
/// contract never proceeds past an error handler.
pub type ErrorHandler = Arc<
    dyn Fn(AdapterError, Arc<Request>, Arc<Response>, Next) -> BoxFuture<Result<(), AdapterError>>
        + Send
        + Sync,
>;

/// Wraps an async closure into a [`RouteHandler`].
///
/// ```rust
/// use trestle::{route_handler, Next, Request, Response};
/// use std::sync::Arc;
///
/// let handler = route_handler(|_req: Arc<Request>, res: Arc<Response>, _next: Next| async move {
///     res.reply(Some("Hello Deno!".into()), None)
/// });
/// # drop(handler);
/// ```
pub fn route_handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(Arc<Request>, Arc<Response>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    Arc::new(move |req, res, next| Box::pin(f(req, res, next)))
}

/// Wraps an async closure into an [`ErrorHandler`].
pub fn error_handler<F, Fut>(f: F) -> ErrorHandler
where
    F: Fn(AdapterError, Arc<Request>, Arc<Response>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    Arc::new(move |err, req, res, next| Box::pin(f(err, req, res, next)))
}

enum NextInner {
    /// Proceed to the next stage of the pipeline.
    Proceed(Box<dyn FnOnce() -> BoxFuture<Result<(), AdapterError>> + Send>),
    /// Nothing downstream; running it is a successful no-op.
    Noop,
    /// Running it is a contract violation (e.g. from inside a not-found
    /// handler). The message names the offending call site.
    Forbidden(&'static str),
}

/// The continuation a handler invokes to proceed to the next pipeline stage.
///
/// Consumed on use — a handler can proceed at most once. A handler that
/// returns without calling [`Next::run`] terminates the chain and the
/// response context is materialized as-is.
pub struct Next {
    inner: NextInner,
}

impl Next {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<Result<(), AdapterError>> + Send + 'static,
    {
        Self { inner: NextInner::Proceed(Box::new(f)) }
    }

    /// A continuation with nothing downstream.
    pub fn noop() -> Self {
        Self { inner: NextInner::Noop }
    }

    /// A continuation that must never be invoked; `context` names the
    /// registration it belongs to.
    pub(crate) fn forbidden(context: &'static str) -> Self {
        Self { inner: NextInner::Forbidden(context) }
    }

    /// Proceeds to the next stage and waits for the rest of the chain.
    pub async fn run(self) -> Result<(), AdapterError> {
        match self.inner {
            NextInner::Proceed(f) => f().await,
            NextInner::Noop => Ok(()),
            NextInner::Forbidden(context) => Err(AdapterError::implementation(format!(
                "{context}: next() was unexpectedly called"
            ))),
        }
    }
}
