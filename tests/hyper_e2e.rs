//! End-to-end tests for the hyper binding, over real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use http::StatusCode;
use trestle::{
    AdapterError, HttpAdapter, HyperAdapter, Next, Request, Response, RouteHandler, ServerOptions,
    ShutdownMode, error_handler, route_handler,
};

fn client() -> reqwest::Client {
    // One connection per request so a draining shutdown never waits on an
    // idle keep-alive connection held by the test client.
    reqwest::Client::builder().pool_max_idle_per_host(0).build().unwrap()
}

async fn start(adapter: &HyperAdapter) -> SocketAddr {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
    adapter.listen(0, Some("127.0.0.1".to_owned()), None).await.unwrap();
    adapter.address().unwrap()
}

fn greet() -> RouteHandler {
    route_handler(|_req: Arc<Request>, res: Arc<Response>, _next: Next| async move {
        res.reply(Some("Hello Deno!".into()), None)
    })
}

#[tokio::test]
async fn get_route_replies() {
    let adapter = HyperAdapter::new();
    adapter.get("/api/greet", greet()).unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/api/greet")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["content-type"].to_str().unwrap(),
        "text/plain; charset=utf-8"
    );
    assert_eq!(res.text().await.unwrap(), "Hello Deno!");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn post_json_round_trips_with_generated_id() {
    let adapter = HyperAdapter::new();
    let next_id = Arc::new(AtomicU64::new(1));
    adapter
        .post(
            "/api/tags",
            route_handler(move |req: Arc<Request>, res: Arc<Response>, _next| {
                let next_id = Arc::clone(&next_id);
                async move {
                    let mut tag: serde_json::Value = req.json()?;
                    tag["id"] = next_id.fetch_add(1, Ordering::Relaxed).into();
                    res.reply(Some(tag.into()), Some(StatusCode::CREATED))
                }
            }),
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client()
        .post(format!("http://{addr}/api/tags"))
        .json(&serde_json::json!({"name": "rust"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["content-type"].to_str().unwrap(), "application/json");
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"name": "rust", "id": 1}));

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn path_params_reach_the_handler() {
    let adapter = HyperAdapter::new();
    adapter
        .get(
            "/api/tags/:id",
            route_handler(|req: Arc<Request>, res: Arc<Response>, _next| async move {
                let id = req.param("id").unwrap_or("?").to_owned();
                res.reply(Some(format!("tag {id}").into()), None)
            }),
        )
        .unwrap();
    let addr = start(&adapter).await;

    let body =
        client().get(format!("http://{addr}/api/tags/42")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "tag 42");

    adapter.close().await.unwrap();
}

fn recording_middleware(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> RouteHandler {
    let log = Arc::clone(log);
    route_handler(move |_req, _res, next: Next| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(tag);
            next.run().await
        }
    })
}

#[tokio::test]
async fn middleware_runs_in_registration_order() {
    let adapter = HyperAdapter::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    adapter.use_middleware(None, recording_middleware(&log, "m1")).unwrap();
    adapter.use_middleware(None, recording_middleware(&log, "m2")).unwrap();
    adapter.use_middleware(None, recording_middleware(&log, "m3")).unwrap();
    adapter.get("/x", greet()).unwrap();
    let addr = start(&adapter).await;

    client().get(format!("http://{addr}/x")).send().await.unwrap();
    assert_eq!(*log.lock().unwrap(), ["m1", "m2", "m3"]);

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn prefixed_middleware_skips_other_paths() {
    let adapter = HyperAdapter::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    adapter.use_middleware(Some("/api"), recording_middleware(&log, "api")).unwrap();
    adapter.get("/api/x", greet()).unwrap();
    adapter.get("/other", greet()).unwrap();
    let addr = start(&adapter).await;

    let client = client();
    client.get(format!("http://{addr}/other")).send().await.unwrap();
    assert!(log.lock().unwrap().is_empty());
    client.get(format!("http://{addr}/api/x")).send().await.unwrap();
    assert_eq!(*log.lock().unwrap(), ["api"]);

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn middleware_factory_scopes_by_method_and_pattern() {
    let adapter = HyperAdapter::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let factory = adapter.create_middleware_factory(trestle::RequestMethod::Get).unwrap();
    factory("/api/tags/:id", recording_middleware(&log, "scoped")).unwrap();
    adapter.get("/api/tags/:id", greet()).unwrap();
    adapter.post("/api/tags/:id", greet()).unwrap();
    let addr = start(&adapter).await;

    let client = client();
    client.post(format!("http://{addr}/api/tags/1")).send().await.unwrap();
    assert!(log.lock().unwrap().is_empty());
    client.get(format!("http://{addr}/api/tags/1")).send().await.unwrap();
    assert_eq!(*log.lock().unwrap(), ["scoped"]);

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn middleware_can_terminate_without_proceeding() {
    let adapter = HyperAdapter::new();
    adapter
        .use_middleware(
            None,
            route_handler(|_req, res: Arc<Response>, _next| async move {
                res.reply(Some("blocked".into()), Some(StatusCode::FORBIDDEN))
            }),
        )
        .unwrap();
    adapter.get("/x", greet()).unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/x")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "blocked");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn unmatched_requests_get_the_default_404() {
    let adapter = HyperAdapter::new();
    adapter.get("/x", greet()).unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "Cannot GET /nope");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn not_found_handler_intercepts_misses() {
    let adapter = HyperAdapter::new();
    adapter
        .set_not_found_handler(
            route_handler(|_req, res: Arc<Response>, _next| async move {
                res.reply(Some("custom miss".into()), Some(StatusCode::NOT_FOUND))
            }),
            None,
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "custom miss");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn route_handler_invoking_next_falls_through_to_not_found() {
    let adapter = HyperAdapter::new();
    adapter
        .get("/maybe", route_handler(|_req, _res, next: Next| async move { next.run().await }))
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/maybe")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.text().await.unwrap(), "Cannot GET /maybe");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn not_found_handler_catches_handler_raised_404s() {
    let adapter = HyperAdapter::new();
    adapter
        .get(
            "/gone",
            route_handler(|_req, _res, _next| async move {
                Err(AdapterError::not_found("Cannot GET /gone"))
            }),
        )
        .unwrap();
    adapter
        .set_not_found_handler(
            route_handler(|_req, res: Arc<Response>, _next| async move {
                res.reply(Some("custom miss".into()), Some(StatusCode::NOT_FOUND))
            }),
            None,
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/gone")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "custom miss");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn not_found_handler_prefix_scopes_interception() {
    let adapter = HyperAdapter::new();
    adapter
        .set_not_found_handler(
            route_handler(|_req, res: Arc<Response>, _next| async move {
                res.reply(Some("api miss".into()), Some(StatusCode::NOT_FOUND))
            }),
            Some("/api"),
        )
        .unwrap();
    let addr = start(&adapter).await;

    let client = client();
    let res = client.get(format!("http://{addr}/api/nope")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "api miss");
    let res = client.get(format!("http://{addr}/other")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "Cannot GET /other");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn not_found_handler_invoking_next_is_an_internal_error() {
    let adapter = HyperAdapter::new();
    adapter
        .set_not_found_handler(
            route_handler(|_req, _res, next: Next| async move { next.run().await }),
            None,
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = res.text().await.unwrap();
    assert!(body.starts_with("[BUG]"), "body: {body}");
    assert!(body.contains("next() was unexpectedly called"));

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn error_handler_receives_handler_errors() {
    let adapter = HyperAdapter::new();
    adapter
        .get(
            "/teapot",
            route_handler(|_req, _res, _next| async move {
                Err(AdapterError::http(StatusCode::IM_A_TEAPOT, "short and stout"))
            }),
        )
        .unwrap();
    adapter
        .set_error_handler(
            error_handler(|err, _req, res: Arc<Response>, _next| async move {
                res.reply(Some(format!("handled: {err}").into()), Some(StatusCode::BAD_GATEWAY))
            }),
            None,
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/teapot")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.text().await.unwrap(), "handled: http 418 I'm a teapot: short and stout");

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn handler_errors_without_a_handler_use_their_status() {
    let adapter = HyperAdapter::new();
    adapter
        .get(
            "/teapot",
            route_handler(|_req, _res, _next| async move {
                Err(AdapterError::http(StatusCode::IM_A_TEAPOT, "short and stout"))
            }),
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/teapot")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn appended_headers_keep_every_value() {
    let adapter = HyperAdapter::new();
    adapter
        .get(
            "/cookies",
            route_handler(|_req, res: Arc<Response>, _next| async move {
                res.append_header("set-cookie", "a=1")?;
                res.append_header("set-cookie", "b=2")?;
                res.reply(None, None)
            }),
        )
        .unwrap();
    let addr = start(&adapter).await;

    let res = client().get(format!("http://{addr}/cookies")).send().await.unwrap();
    let cookies: Vec<_> = res
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect();
    assert_eq!(cookies, ["a=1", "b=2"]);

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn ready_callback_fires_after_bind() {
    let adapter = HyperAdapter::new();
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    adapter
        .listen(0, Some("127.0.0.1".to_owned()), Some(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        })))
        .await
        .unwrap();
    assert!(fired.load(Ordering::SeqCst));
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn registrations_after_listen_are_rejected() {
    let adapter = HyperAdapter::new();
    let addr = start(&adapter).await;
    let _ = addr;

    assert!(matches!(adapter.get("/late", greet()), Err(AdapterError::Lifecycle(_))));
    assert!(matches!(
        adapter.use_middleware(None, greet()),
        Err(AdapterError::Lifecycle(_))
    ));

    adapter.close().await.unwrap();
}

#[tokio::test]
async fn close_releases_the_port_for_a_fresh_instance() {
    let adapter = HyperAdapter::new();
    let addr = start(&adapter).await;
    adapter.close().await.unwrap();
    assert!(adapter.address().is_none());

    // A closed instance never listens again.
    assert!(matches!(
        adapter.listen(addr.port(), Some("127.0.0.1".to_owned()), None).await,
        Err(AdapterError::Lifecycle(_))
    ));

    // But a fresh one binds the same port immediately.
    let fresh = HyperAdapter::new();
    fresh.get("/x", greet()).unwrap();
    fresh.listen(addr.port(), Some("127.0.0.1".to_owned()), None).await.unwrap();
    assert_eq!(fresh.address().unwrap().port(), addr.port());
    fresh.close().await.unwrap();
}

#[tokio::test]
async fn close_before_listen_is_a_lifecycle_error() {
    let adapter = HyperAdapter::new();
    assert!(matches!(adapter.close().await, Err(AdapterError::Lifecycle(_))));
}

#[tokio::test]
async fn immediate_shutdown_closes_promptly() {
    let adapter = HyperAdapter::new();
    adapter
        .init_http_server(ServerOptions { shutdown: ShutdownMode::Immediate, ..Default::default() })
        .unwrap();
    adapter.get("/x", greet()).unwrap();
    let addr = start(&adapter).await;

    client().get(format!("http://{addr}/x")).send().await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), adapter.close())
        .await
        .expect("close did not resolve")
        .unwrap();
}

#[tokio::test]
async fn tls_options_are_rejected_at_listen() {
    let adapter = HyperAdapter::new();
    adapter
        .init_http_server(ServerOptions {
            https: Some(trestle::HttpsOptions { cert: vec![], key: vec![] }),
            ..Default::default()
        })
        .unwrap();
    let err = adapter.listen(0, Some("127.0.0.1".to_owned()), None).await.unwrap_err();
    assert!(matches!(err, AdapterError::NotSupported { .. }));
}

#[tokio::test]
async fn all_routes_catch_every_method() {
    let adapter = HyperAdapter::new();
    adapter.all("/any", greet()).unwrap();
    let addr = start(&adapter).await;

    let client = client();
    for method in [reqwest::Method::GET, reqwest::Method::POST, reqwest::Method::DELETE] {
        let res =
            client.request(method, format!("http://{addr}/any")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    adapter.close().await.unwrap();
}
