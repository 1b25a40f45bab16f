//! Instance bridge for the axum runtime.
//!
//! Unlike the hyper bridge, this one does not own a request loop: the
//! registrations are frozen into an `axum::Router` at `listen()` and axum
//! drives everything. The framework's continuation handlers are grafted onto
//! axum's middleware chain with one trick: an outermost "context" layer
//! buffers the body, builds the shared [`Request`]/[`Response`] pair, and
//! stores it in the request extensions. Inner stages run framework handlers
//! against that pair and answer with a marker response; the context layer
//! materializes the response context exactly once, when the marker comes
//! back. Responses produced by the runtime itself (static files, CORS
//! preflights) carry no marker and pass through untouched.
//!
//! Layers wrap outside-in, so registrations are applied to the router in
//! reverse order; execution order then equals registration order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::extract::{RawPathParams, Request as AxumRequest};
use axum::middleware::{self as axum_middleware, Next as AxumNext};
use axum::response::Response as AxumResponse;
use axum::routing::{MethodFilter, any, on};
use http::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::adapter::{ReadyCallback, RequestMethod, ShutdownMode, StaticAssetsOptions};
use crate::context::{Request, Response, plain_response};
use crate::cors;
use crate::error::AdapterError;
use crate::handler::{ErrorHandler, Next, RouteHandler};
use crate::path::{prefix_matches, strip_prefix, to_router_pattern};
use crate::registry::{Core, MiddlewareReg, Snapshot};

pub(crate) struct AxumBridge {
    pub(crate) core: Core,
    serve: Mutex<Option<ServeHandle>>,
}

struct ServeHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    mode: ShutdownMode,
}

impl AxumBridge {
    pub fn new() -> Self {
        Self { core: Core::new(), serve: Mutex::new(None) }
    }

    pub async fn listen(
        self: &Arc<Self>,
        port: u16,
        hostname: Option<String>,
        ready: Option<ReadyCallback>,
    ) -> Result<(), AdapterError> {
        let snapshot = self.core.begin_listen("AxumAdapter::listen")?;
        let mode = snapshot.options.shutdown;
        let router = match build_router(snapshot) {
            Ok(router) => router,
            Err(e) => {
                self.core.abort_listen();
                return Err(e);
            }
        };

        let host = hostname.unwrap_or_else(|| "0.0.0.0".to_owned());
        let listener = match TcpListener::bind((host.as_str(), port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.core.abort_listen();
                return Err(e.into());
            }
        };
        let addr = listener.local_addr()?;
        self.core.mark_bound(addr);
        info!(%addr, "axum adapter listening");

        if let Some(ready) = ready {
            ready();
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let signal = async move {
            let _ = shutdown_rx.changed().await;
        };
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(signal).await {
                error!("serve error: {e}");
            }
            info!("axum adapter stopped");
        });

        let handle = ServeHandle { shutdown: shutdown_tx, task, mode };
        *self.serve.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    pub async fn close(&self) -> Result<(), AdapterError> {
        self.core.begin_close()?;
        let handle = self.serve.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return Err(AdapterError::implementation("listening adapter has no serve task"));
        };
        let _ = handle.shutdown.send(true);
        if handle.mode == ShutdownMode::Immediate {
            // Aborting the serve task drops the listener and every in-flight
            // connection with it.
            handle.task.abort();
        }
        match handle.task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                return Err(AdapterError::implementation(format!("serve task panicked: {e}")));
            }
        }
        self.core.mark_closed();
        info!("axum adapter closed");
        Ok(())
    }
}

// ── Shared per-request pieces ─────────────────────────────────────────────────

/// The framework's request/response pair, carried through axum's extensions.
#[derive(Clone)]
struct Ctx {
    request: Arc<Request>,
    response: Arc<Response>,
}

/// Marker extension on responses whose real content lives in the response
/// context and still needs materializing.
#[derive(Clone, Copy)]
struct Deferred;

fn deferred() -> AxumResponse {
    let mut response = AxumResponse::new(Body::empty());
    response.extensions_mut().insert(Deferred);
    response
}

fn plain(status: StatusCode, message: &str) -> AxumResponse {
    plain_response(status, message).map(Body::new)
}

fn missing_ctx(stage: &'static str) -> AxumResponse {
    error!("{stage}: request context extension is missing");
    plain(StatusCode::INTERNAL_SERVER_ERROR, "request context missing")
}

struct ErrorShared {
    error_handler: Option<ErrorHandler>,
    not_found: Option<(Option<String>, RouteHandler)>,
}

// ── Router construction ───────────────────────────────────────────────────────

fn build_router(snapshot: Snapshot) -> Result<Router, AdapterError> {
    let shared = Arc::new(ErrorShared {
        error_handler: snapshot.error_handler,
        not_found: snapshot.not_found,
    });

    // The router panics on conflicting registrations, so duplicates are
    // turned into errors here first.
    let mut seen: HashMap<String, HashSet<RequestMethod>> = HashMap::new();
    for (method, path, _) in &snapshot.routes {
        let methods = seen.entry(to_router_pattern(path)).or_default();
        let conflict = methods.contains(method)
            || methods.contains(&RequestMethod::All)
            || (*method == RequestMethod::All && !methods.is_empty());
        if conflict {
            return Err(AdapterError::Route {
                path: path.clone(),
                reason: "duplicate registration for this method".to_owned(),
            });
        }
        methods.insert(*method);
    }

    let mut router = Router::new();
    for (method, path, handler) in snapshot.routes {
        let endpoint = {
            let shared = Arc::clone(&shared);
            move |params: RawPathParams, request: AxumRequest| {
                let handler = Arc::clone(&handler);
                let shared = Arc::clone(&shared);
                async move { route_endpoint(handler, shared, params, request).await }
            }
        };
        let method_router = match method_filter(method) {
            Some(filter) => on(filter, endpoint),
            None => any(endpoint),
        };
        router = router.route(&to_router_pattern(&path), method_router);
    }

    router = router.fallback({
        let shared = Arc::clone(&shared);
        move |request: AxumRequest| {
            let shared = Arc::clone(&shared);
            async move {
                let Some(ctx) = request.extensions().get::<Ctx>().cloned() else {
                    return missing_ctx("fallback");
                };
                let message =
                    format!("Cannot {} {}", ctx.request.method(), ctx.request.path());
                finish(&shared, &ctx, Err(AdapterError::not_found(message))).await
            }
        }
    });

    for registration in snapshot.middleware.into_iter().rev() {
        router = match registration {
            MiddlewareReg::Plain { prefix, handler } => {
                let shared = Arc::clone(&shared);
                router.layer(axum_middleware::from_fn(
                    move |request: AxumRequest, next: AxumNext| {
                        let handler = Arc::clone(&handler);
                        let shared = Arc::clone(&shared);
                        let prefix = prefix.clone();
                        async move {
                            let applies = prefix
                                .as_deref()
                                .is_none_or(|p| prefix_matches(p, request.uri().path()));
                            if !applies {
                                return next.run(request).await;
                            }
                            run_middleware(handler, shared, request, next).await
                        }
                    },
                ))
            }
            MiddlewareReg::Routed { method, pattern, handler } => {
                let mut matcher = matchit::Router::new();
                matcher.insert(to_router_pattern(&pattern), ()).map_err(|e| {
                    AdapterError::Route { path: pattern.clone(), reason: e.to_string() }
                })?;
                let matcher = Arc::new(matcher);
                let shared = Arc::clone(&shared);
                router.layer(axum_middleware::from_fn(
                    move |request: AxumRequest, next: AxumNext| {
                        let handler = Arc::clone(&handler);
                        let shared = Arc::clone(&shared);
                        let matcher = Arc::clone(&matcher);
                        async move {
                            let hit = method.matches(request.method())
                                && matcher.at(request.uri().path()).is_ok();
                            if !hit {
                                return next.run(request).await;
                            }
                            run_middleware(handler, shared, request, next).await
                        }
                    },
                ))
            }
            MiddlewareReg::Cors(config) => router.layer(cors::to_layer(config)),
            MiddlewareReg::Static(options) => router.layer(axum_middleware::from_fn(
                move |request: AxumRequest, next: AxumNext| {
                    let options = options.clone();
                    async move { serve_static(options, request, next).await }
                },
            )),
        };
    }

    // Outermost: buffer the body and attach the context every inner stage
    // relies on.
    Ok(router.layer(axum_middleware::from_fn(attach_ctx)))
}

fn method_filter(method: RequestMethod) -> Option<MethodFilter> {
    match method {
        RequestMethod::Get => Some(MethodFilter::GET),
        RequestMethod::Post => Some(MethodFilter::POST),
        RequestMethod::Put => Some(MethodFilter::PUT),
        RequestMethod::Patch => Some(MethodFilter::PATCH),
        RequestMethod::Delete => Some(MethodFilter::DELETE),
        RequestMethod::Head => Some(MethodFilter::HEAD),
        RequestMethod::Options => Some(MethodFilter::OPTIONS),
        RequestMethod::All => None,
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

async fn attach_ctx(request: AxumRequest, next: AxumNext) -> AxumResponse {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("failed to read request body: {e}");
            return plain(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let ctx = Ctx {
        request: Arc::new(Request::from_parts(parts.clone(), bytes.clone())),
        response: Arc::new(Response::new()),
    };
    let mut request = AxumRequest::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(ctx.clone());

    let response = next.run(request).await;
    if response.extensions().get::<Deferred>().is_some() {
        ctx.response.take_http().map(Body::new)
    } else {
        response
    }
}

async fn route_endpoint(
    handler: RouteHandler,
    shared: Arc<ErrorShared>,
    params: RawPathParams,
    request: AxumRequest,
) -> AxumResponse {
    let Some(ctx) = request.extensions().get::<Ctx>().cloned() else {
        return missing_ctx("route");
    };
    ctx.request
        .set_params(params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect());
    // A route handler that proceeds past itself leaves the request
    // unhandled; its continuation takes the not-found path.
    let fall_through = {
        let method = ctx.request.method().clone();
        let path = ctx.request.path().to_owned();
        Next::new(move || {
            Box::pin(async move { Err(AdapterError::not_found(format!("Cannot {method} {path}"))) })
        })
    };
    let result =
        handler(Arc::clone(&ctx.request), Arc::clone(&ctx.response), fall_through).await;
    finish(&shared, &ctx, result).await
}

/// Runs one continuation middleware inside axum's chain. The downstream
/// response is captured into a slot by the continuation; a handler that
/// terminates without proceeding answers with the marker instead.
async fn run_middleware(
    handler: RouteHandler,
    shared: Arc<ErrorShared>,
    request: AxumRequest,
    next: AxumNext,
) -> AxumResponse {
    let Some(ctx) = request.extensions().get::<Ctx>().cloned() else {
        return missing_ctx("middleware");
    };

    let slot: Arc<Mutex<Option<AxumResponse>>> = Arc::new(Mutex::new(None));
    let continuation = {
        let slot = Arc::clone(&slot);
        Next::new(move || {
            Box::pin(async move {
                let response = next.run(request).await;
                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(response);
                Ok(())
            })
        })
    };

    let result =
        handler(Arc::clone(&ctx.request), Arc::clone(&ctx.response), continuation).await;
    match result {
        Ok(()) => {
            let downstream = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            downstream.unwrap_or_else(deferred)
        }
        Err(e) => finish(&shared, &ctx, Err(e)).await,
    }
}

async fn serve_static(
    options: StaticAssetsOptions,
    request: AxumRequest,
    next: AxumNext,
) -> AxumResponse {
    let path = request.uri().path();
    if !prefix_matches(&options.prefix, path) {
        return next.run(request).await;
    }
    let stripped = strip_prefix(&options.prefix, path).to_owned();

    let mut file_request = http::Request::builder().method(request.method().clone()).uri(stripped);
    if let Some(headers) = file_request.headers_mut() {
        *headers = request.headers().clone();
    }
    let file_request = match file_request.body(Body::empty()) {
        Ok(r) => r,
        Err(_) => return next.run(request).await,
    };

    let serve = ServeDir::new(&options.root)
        .append_index_html_on_directories(options.serve_index);
    let response = match serve.oneshot(file_request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    // A miss inside the prefix falls through to routing, like any other
    // unhandled request.
    if response.status() == StatusCode::NOT_FOUND {
        return next.run(request).await;
    }
    response.map(Body::new)
}

/// Routes a stage outcome to the not-found handler, the error handler, or
/// the default error response, in that order of applicability.
async fn finish(
    shared: &ErrorShared,
    ctx: &Ctx,
    result: Result<(), AdapterError>,
) -> AxumResponse {
    let result = match result {
        Err(e) if e.is_not_found() => match &shared.not_found {
            Some((prefix, handler))
                if prefix.as_deref().is_none_or(|p| prefix_matches(p, ctx.request.path())) =>
            {
                handler(
                    Arc::clone(&ctx.request),
                    Arc::clone(&ctx.response),
                    Next::forbidden("set_not_found_handler"),
                )
                .await
            }
            _ => Err(e),
        },
        other => other,
    };

    match result {
        Ok(()) => deferred(),
        Err(error) => {
            if matches!(error, AdapterError::Implementation(_)) {
                error!("{error}");
            }
            match &shared.error_handler {
                Some(handler) => {
                    let outcome = handler(
                        error,
                        Arc::clone(&ctx.request),
                        Arc::clone(&ctx.response),
                        Next::noop(),
                    )
                    .await;
                    match outcome {
                        Ok(()) => deferred(),
                        Err(e) => {
                            error!("error handler failed: {e}");
                            plain(StatusCode::INTERNAL_SERVER_ERROR, "error handler failed")
                        }
                    }
                }
                None => plain(error.response_status(), &error.response_body()),
            }
        }
    }
}
