//! Instance bridge for the hyper runtime.
//!
//! The bridge owns the whole request lifecycle itself: a tokio accept loop,
//! hyper's auto (HTTP/1.1 + HTTP/2) connection builder, a matchit route
//! table, and the continuation chain that drives the framework's 3-argument
//! handlers. Registrations accumulate in the shared [`Core`] during
//! bootstrap and are frozen into an immutable [`Shared`] snapshot when
//! `listen()` starts the serve task.
//!
//! # Shutdown
//!
//! `close()` flips a watch channel; the serve loop stops accepting, drops
//! the listener (releasing the socket), then either drains watched
//! connections or aborts them per [`ShutdownMode`]. `close()` resolves only
//! after the serve task has fully exited, so an immediate re-`listen` on the
//! same port by a fresh instance cannot observe a still-bound socket.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::adapter::{ReadyCallback, RequestMethod, ShutdownMode};
use crate::context::{Request, Response, ResponseBody, plain_response};
use crate::error::AdapterError;
use crate::handler::{BoxFuture, ErrorHandler, Next, RouteHandler};
use crate::path::{prefix_matches, to_router_pattern};
use crate::registry::{Core, MiddlewareReg, Snapshot};

pub(crate) struct HyperBridge {
    pub(crate) core: Core,
    serve: Mutex<Option<ServeHandle>>,
}

struct ServeHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl HyperBridge {
    pub fn new() -> Self {
        Self { core: Core::new(), serve: Mutex::new(None) }
    }

    pub async fn listen(
        self: &Arc<Self>,
        port: u16,
        hostname: Option<String>,
        ready: Option<ReadyCallback>,
    ) -> Result<(), AdapterError> {
        let snapshot = self.core.begin_listen("HyperAdapter::listen")?;
        let shared = match Shared::build(snapshot) {
            Ok(shared) => Arc::new(shared),
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
        info!(%addr, "hyper adapter listening");

        if let Some(ready) = ready {
            ready();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mode = shared.shutdown_mode;
        let task = tokio::spawn(serve_loop(listener, shared, shutdown_rx, mode));

        let handle = ServeHandle { shutdown: shutdown_tx, task };
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
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                return Err(AdapterError::implementation(format!("serve task panicked: {e}")));
            }
        }
        self.core.mark_closed();
        info!("hyper adapter closed");
        Ok(())
    }
}

// ── Frozen registration snapshot ──────────────────────────────────────────────

enum CompiledMiddleware {
    Plain { prefix: Option<String>, handler: RouteHandler },
    Routed { method: RequestMethod, matcher: matchit::Router<()>, handler: RouteHandler },
}

struct Shared {
    table: RouteTable,
    middleware: Vec<CompiledMiddleware>,
    error_handler: Option<ErrorHandler>,
    not_found: Option<(Option<String>, RouteHandler)>,
    shutdown_mode: ShutdownMode,
}

impl Shared {
    fn build(snapshot: Snapshot) -> Result<Self, AdapterError> {
        let table = RouteTable::build(&snapshot.routes)?;
        let mut middleware = Vec::with_capacity(snapshot.middleware.len());
        for registration in snapshot.middleware {
            match registration {
                MiddlewareReg::Plain { prefix, handler } => {
                    middleware.push(CompiledMiddleware::Plain { prefix, handler });
                }
                MiddlewareReg::Routed { method, pattern, handler } => {
                    let mut matcher = matchit::Router::new();
                    matcher.insert(to_router_pattern(&pattern), ()).map_err(|e| {
                        AdapterError::Route { path: pattern.clone(), reason: e.to_string() }
                    })?;
                    middleware.push(CompiledMiddleware::Routed { method, matcher, handler });
                }
                // enable_cors / use_static_assets fail before registering on
                // this runtime, so these cannot appear here.
                MiddlewareReg::Cors(_) | MiddlewareReg::Static(_) => {
                    return Err(AdapterError::implementation(
                        "unsupported middleware registration reached the hyper bridge",
                    ));
                }
            }
        }
        Ok(Self {
            table,
            middleware,
            error_handler: snapshot.error_handler,
            not_found: snapshot.not_found,
            shutdown_mode: snapshot.options.shutdown,
        })
    }
}

// ── Route table ───────────────────────────────────────────────────────────────

/// One radix tree per request method, plus the `ALL` tree checked on miss.
struct RouteTable {
    trees: HashMap<RequestMethod, matchit::Router<RouteHandler>>,
}

impl RouteTable {
    fn build(routes: &[(RequestMethod, String, RouteHandler)]) -> Result<Self, AdapterError> {
        let mut trees: HashMap<RequestMethod, matchit::Router<RouteHandler>> = HashMap::new();
        for (method, path, handler) in routes {
            trees
                .entry(*method)
                .or_default()
                .insert(to_router_pattern(path), handler.clone())
                .map_err(|e| AdapterError::Route { path: path.clone(), reason: e.to_string() })?;
        }
        Ok(Self { trees })
    }

    fn lookup(
        &self,
        method: &http::Method,
        path: &str,
    ) -> Option<(RouteHandler, HashMap<String, String>)> {
        let exact = request_method_of(method).and_then(|m| self.lookup_in(m, path));
        exact.or_else(|| self.lookup_in(RequestMethod::All, path))
    }

    fn lookup_in(
        &self,
        method: RequestMethod,
        path: &str,
    ) -> Option<(RouteHandler, HashMap<String, String>)> {
        let matched = self.trees.get(&method)?.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((matched.value.clone(), params))
    }
}

fn request_method_of(method: &http::Method) -> Option<RequestMethod> {
    match *method {
        http::Method::GET => Some(RequestMethod::Get),
        http::Method::POST => Some(RequestMethod::Post),
        http::Method::PUT => Some(RequestMethod::Put),
        http::Method::PATCH => Some(RequestMethod::Patch),
        http::Method::DELETE => Some(RequestMethod::Delete),
        http::Method::HEAD => Some(RequestMethod::Head),
        http::Method::OPTIONS => Some(RequestMethod::Options),
        _ => None,
    }
}

// ── Serve loop ────────────────────────────────────────────────────────────────

async fn serve_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    mode: ShutdownMode,
) {
    let graceful = GracefulShutdown::new();
    // JoinSet tracks every spawned connection task so shutdown can drain or
    // abort them as configured.
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            // `biased` checks arms top-to-bottom, so a close() immediately
            // stops accepting even when more connections are queued.
            biased;

            _ = shutdown.changed() => {
                info!(in_flight = tasks.len(), "shutdown signal received");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let shared = Arc::clone(&shared);
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req| {
                    let shared = Arc::clone(&shared);
                    async move { dispatch(shared, req).await }
                });

                let conn = ConnBuilder::new(TokioExecutor::new())
                    .serve_connection(io, svc)
                    .into_owned();
                let watched = graceful.watch(conn);
                tasks.spawn(async move {
                    if let Err(e) = watched.await {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set does not grow without
            // bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    // Release the socket before waiting on connections, so close() resolving
    // implies the port is free.
    drop(listener);

    match mode {
        ShutdownMode::Drain => {
            graceful.shutdown().await;
            while tasks.join_next().await.is_some() {}
        }
        ShutdownMode::Immediate => {
            drop(graceful);
            tasks.shutdown().await;
        }
    }
    info!("hyper adapter stopped");
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request through middleware, handler, not-found, and error
/// stages. The error type is [`Infallible`]: every failure becomes an HTTP
/// response here, hyper never sees an error.
async fn dispatch(
    shared: Arc<Shared>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<ResponseBody>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("failed to read request body: {e}");
            return Ok(plain_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_owned();
    let request = Arc::new(Request::from_parts(parts, body));
    let response = Arc::new(Response::new());

    let matched = shared.table.lookup(&method, &path);

    let mut stages: VecDeque<RouteHandler> = VecDeque::new();
    for middleware in &shared.middleware {
        match middleware {
            CompiledMiddleware::Plain { prefix, handler } => {
                let applies = prefix.as_deref().is_none_or(|p| prefix_matches(p, &path));
                if applies {
                    stages.push_back(Arc::clone(handler));
                }
            }
            CompiledMiddleware::Routed { method: m, matcher, handler } => {
                if m.matches(&method) && matcher.at(&path).is_ok() {
                    stages.push_back(Arc::clone(handler));
                }
            }
        }
    }

    if let Some((handler, params)) = matched {
        request.set_params(params);
        stages.push_back(handler);
    }

    // Terminal fall-through: reached when no route matched, or when the
    // matched handler proceeds past itself. Either way the request is
    // unhandled and takes the not-found path.
    let message = format!("Cannot {method} {path}");
    stages.push_back(crate::handler::route_handler(move |_req, _res, _next| {
        let message = message.clone();
        async move { Err(AdapterError::not_found(message)) }
    }));

    let mut result = run_chain(stages, Arc::clone(&request), Arc::clone(&response)).await;

    // A downstream 404 is routed to the not-found handler; its continuation
    // must never be invoked.
    if let Err(error) = &result {
        if error.is_not_found() {
            if let Some((prefix, handler)) = &shared.not_found {
                let applies = prefix.as_deref().is_none_or(|p| prefix_matches(p, &path));
                if applies {
                    result = handler(
                        Arc::clone(&request),
                        Arc::clone(&response),
                        Next::forbidden("set_not_found_handler"),
                    )
                    .await;
                }
            }
        }
    }

    match result {
        Ok(()) => Ok(response.take_http()),
        Err(error) => Ok(handle_error(&shared, error, &request, &response).await),
    }
}

/// Runs the remaining pipeline stages in order. Each stage receives a
/// continuation that runs the rest of the chain; a stage that returns
/// without invoking it terminates the pipeline.
fn run_chain(
    mut stages: VecDeque<RouteHandler>,
    request: Arc<Request>,
    response: Arc<Response>,
) -> BoxFuture<Result<(), AdapterError>> {
    Box::pin(async move {
        let Some(stage) = stages.pop_front() else {
            return Ok(());
        };
        let next = if stages.is_empty() {
            Next::noop()
        } else {
            let request = Arc::clone(&request);
            let response = Arc::clone(&response);
            Next::new(move || run_chain(stages, request, response))
        };
        stage(request, response, next).await
    })
}

/// Hands a request error to the registered error handler, or produces the
/// default response. Internal errors are logged loudly either way.
async fn handle_error(
    shared: &Shared,
    error: AdapterError,
    request: &Arc<Request>,
    response: &Arc<Response>,
) -> http::Response<ResponseBody> {
    if matches!(error, AdapterError::Implementation(_)) {
        error!("{error}");
    }
    match &shared.error_handler {
        Some(handler) => {
            let result =
                handler(error, Arc::clone(request), Arc::clone(response), Next::noop()).await;
            match result {
                Ok(()) => response.take_http(),
                Err(e) => {
                    error!("error handler failed: {e}");
                    plain_response(StatusCode::INTERNAL_SERVER_ERROR, "error handler failed")
                }
            }
        }
        None => plain_response(error.response_status(), &error.response_body()),
    }
}
