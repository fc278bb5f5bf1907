use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use tokio::time::sleep;
use tower::{service_fn, Layer, Service, ServiceExt};

use gateway_http_cache::prelude::*;

const BODY: &str = r#"{"message": "Hello World"}"#;

/// Origin double that counts calls and records the headers it received.
#[derive(Clone)]
struct Origin {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<HeaderMap>>>,
    status: StatusCode,
    headers: Vec<(&'static str, &'static str)>,
}

impl Origin {
    fn new(status: StatusCode) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            status,
            headers: Vec::new(),
        }
    }

    fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Service<Request<()>> for Origin {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<()>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("seen lock")
            .push(req.headers().clone());

        let mut builder = Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(*name, *value);
        }
        ready(Ok(builder.body(Full::from(BODY)).expect("valid response")))
    }
}

async fn memory_registry() -> BackendRegistry {
    let registry = BackendRegistry::new();
    registry
        .register("memory", &ConnectionConfig::memory())
        .await
        .expect("memory connection");
    registry
}

fn route(headers: &[&str]) -> ClientConfig {
    ClientConfig::new(1, "memory", headers.iter().copied()).expect("valid route config")
}

fn get(uri: &str, headers: &[(&'static str, &'static str)]) -> Request<()> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(()).expect("valid request")
}

async fn send<S>(service: &mut S, req: Request<()>) -> (StatusCode, HeaderMap, String)
where
    S: Service<Request<()>, Response = Response<Full<Bytes>>>,
    S::Error: std::fmt::Debug,
{
    let response = service
        .ready()
        .await
        .expect("service ready")
        .call(req)
        .await
        .expect("call succeeds");
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.expect("body collected").to_bytes();
    (
        parts.status,
        parts.headers,
        String::from_utf8(bytes.to_vec()).expect("utf-8 body"),
    )
}

#[tokio::test]
async fn caches_successful_gets() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    let (first_status, _, first) = send(&mut service, get("/x", &[])).await;
    let (second_status, _, second) = send(&mut service, get("/x", &[])).await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first, BODY);
    assert_eq!(second, first, "second response should come from cache");
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn cached_response_keeps_headers() {
    let origin = Origin::new(StatusCode::OK)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "a=1")
        .with_header("set-cookie", "b=2");
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[])).await;
    let (_, headers, _) = send(&mut service, get("/x", &[])).await;

    assert_eq!(origin.calls(), 1);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
}

#[tokio::test]
async fn different_uris_are_cached_separately() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x?page=1", &[])).await;
    send(&mut service, get("/x?page=2", &[])).await;
    send(&mut service, get("/x?page=1", &[])).await;

    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn allow_listed_header_changes_key() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&["x"])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[("x", "1")])).await;
    send(&mut service, get("/x", &[("x", "2")])).await;
    assert_eq!(origin.calls(), 2);

    send(&mut service, get("/x", &[("x", "1")])).await;
    assert_eq!(origin.calls(), 2, "X=1 is still cached");
}

#[tokio::test]
async fn other_headers_do_not_change_key() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&["X-Tenant"])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(
        &mut service,
        get("/x", &[("x-tenant", "acme"), ("user-agent", "curl")]),
    )
    .await;
    send(
        &mut service,
        get("/x", &[("x-tenant", "acme"), ("user-agent", "firefox")]),
    )
    .await;

    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn non_get_methods_are_not_implemented() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
        let req = Request::builder()
            .method(method)
            .uri("/x")
            .body(())
            .expect("valid request");
        let (status, _, body) = send(&mut service, req).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert!(body.is_empty());
    }

    assert_eq!(origin.calls(), 0, "origin never reached");

    send(&mut service, get("/x", &[])).await;
    assert_eq!(origin.calls(), 1, "nothing was cached for /x");
}

#[tokio::test]
async fn only_successful_statuses_are_cached() {
    let cases = [
        (StatusCode::OK, 1),
        (StatusCode::NON_AUTHORITATIVE_INFORMATION, 1),
        (StatusCode::MOVED_PERMANENTLY, 2),
        (StatusCode::NOT_MODIFIED, 2),
        (StatusCode::BAD_REQUEST, 2),
        (StatusCode::NOT_FOUND, 2),
        (StatusCode::INTERNAL_SERVER_ERROR, 2),
        (StatusCode::SERVICE_UNAVAILABLE, 2),
    ];

    for (status, expected_calls) in cases {
        let origin = Origin::new(status);
        let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
        let mut service = layer.layer(origin.clone());

        for _ in 0..2 {
            let (got, _, body) = send(&mut service, get("/test", &[])).await;
            assert_eq!(got, status, "status delivered unmodified");
            assert_eq!(body, BODY, "body delivered unmodified for {status}");
        }

        assert_eq!(origin.calls(), expected_calls, "origin calls for {status}");
    }
}

#[tokio::test]
async fn flush_between_requests_reaches_origin_again() {
    let origin = Origin::new(StatusCode::OK);
    let registry = memory_registry().await;
    let layer = CacheLayer::new(registry.clone(), route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[])).await;
    registry.flush("memory").await.expect("flush");
    let (status, _, body) = send(&mut service, get("/x", &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, BODY);
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[])).await;
    send(&mut service, get("/x", &[])).await;
    assert_eq!(origin.calls(), 1);

    sleep(Duration::from_millis(1_100)).await;

    send(&mut service, get("/x", &[])).await;
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn zero_ttl_never_caches() {
    let origin = Origin::new(StatusCode::OK);
    let config = ClientConfig::new(0, "memory", Vec::<String>::new()).expect("config");
    let layer = CacheLayer::new(memory_registry().await, config).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[])).await;
    send(&mut service, get("/x", &[])).await;
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn origin_receives_sanitized_request() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    send(
        &mut service,
        get(
            "/x",
            &[
                ("if-none-match", "\"abc\""),
                ("if-modified-since", "Wed, 21 Oct 2015 07:28:00 GMT"),
                ("cache-control", "no-cache"),
                ("accept-encoding", "gzip"),
                ("accept", "application/json"),
            ],
        ),
    )
    .await;

    let seen = origin.seen.lock().expect("seen lock");
    let headers = &seen[0];
    assert!(!headers.contains_key(IF_NONE_MATCH));
    assert!(!headers.contains_key("if-modified-since"));
    assert!(!headers.contains_key(CACHE_CONTROL));
    assert!(!headers.contains_key(ACCEPT_ENCODING));
    assert_eq!(headers["accept"], "application/json");
}

#[tokio::test]
async fn matching_etag_yields_empty_not_modified() {
    let origin = Origin::new(StatusCode::OK).with_header("etag", "W/\"foo\"");
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    let (status, headers, body) =
        send(&mut service, get("/test", &[("if-none-match", "W/\"foo\"")])).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED, "fresh from origin");
    assert!(body.is_empty());
    assert_eq!(headers[ETAG], "W/\"foo\"");

    let (status, _, body) =
        send(&mut service, get("/test", &[("if-none-match", "W/\"bar\"")])).await;
    assert_eq!(status, StatusCode::OK, "stale validator gets full body");
    assert_eq!(body, BODY);

    let (status, _, body) =
        send(&mut service, get("/test", &[("if-none-match", "W/\"foo\"")])).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED, "fresh from cache");
    assert!(body.is_empty());

    assert_eq!(origin.calls(), 1, "the 304 path still stored the full response");
}

#[tokio::test]
async fn matching_validator_on_error_response_yields_not_modified() {
    let origin = Origin::new(StatusCode::NOT_FOUND).with_header("etag", "\"a\"");
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    for _ in 0..2 {
        let (status, headers, body) =
            send(&mut service, get("/missing", &[("if-none-match", "\"a\"")])).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(body.is_empty());
        assert_eq!(headers[ETAG], "\"a\"");
    }

    let (status, _, body) = send(&mut service, get("/missing", &[])).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "no validator, origin answer as-is");
    assert_eq!(body, BODY);
    assert_eq!(origin.calls(), 3, "404 is never stored");
}

#[tokio::test]
async fn modified_since_yields_not_modified() {
    let origin = Origin::new(StatusCode::OK)
        .with_header("last-modified", "Tue, 20 Oct 2015 07:28:00 GMT");
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    let (status, _, _) = send(
        &mut service,
        get("/x", &[("if-modified-since", "Wed, 21 Oct 2015 07:28:00 GMT")]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);

    let (status, _, body) = send(
        &mut service,
        get("/x", &[("if-modified-since", "Mon, 19 Oct 2015 07:28:00 GMT")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, BODY);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn origin_failure_is_internal_server_error_and_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(service_fn({
        let calls = calls.clone();
        move |_req: Request<()>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<Response<Full<Bytes>>, _>(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))
            }
        }
    }));

    for _ in 0..2 {
        let (status, _, body) = send(&mut service, get("/x", &[])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2, "failures are never cached");
}

#[tokio::test]
async fn body_failure_is_internal_server_error() {
    let layer = CacheLayer::new(memory_registry().await, route(&[])).expect("layer");
    let mut service = layer.layer(service_fn(|_req: Request<()>| async {
        let frames: Vec<Result<Frame<Bytes>, std::io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection reset",
            )),
        ];
        let body = StreamBody::new(futures_util::stream::iter(frames));
        Ok::<_, Infallible>(Response::new(body))
    }));

    let (status, _, body) = send(&mut service, get("/x", &[])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unregistered_connection_behaves_as_miss() {
    let origin = Origin::new(StatusCode::OK);
    let config = ClientConfig::new(1, "nowhere", Vec::<String>::new()).expect("config");
    let layer = CacheLayer::new(memory_registry().await, config).expect("layer");
    let mut service = layer.layer(origin.clone());

    for _ in 0..2 {
        let (status, _, body) = send(&mut service, get("/x", &[])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BODY);
    }
    assert_eq!(origin.calls(), 2);
}

/// Backend whose every operation fails.
struct BrokenBackend;

#[async_trait]
impl CacheBackend for BrokenBackend {
    async fn fetch(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
        Err(CacheError::Backend("read timeout".into()))
    }

    async fn save(&self, _key: String, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("write timeout".into()))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        Err(CacheError::Backend("flush timeout".into()))
    }
}

#[tokio::test]
async fn backend_failures_never_fail_the_request() {
    let origin = Origin::new(StatusCode::OK);
    let registry = BackendRegistry::new();
    registry.insert("memory", Arc::new(BrokenBackend));
    let layer = CacheLayer::new(registry.clone(), route(&[])).expect("layer");
    let mut service = layer.layer(origin.clone());

    for _ in 0..2 {
        let (status, _, body) = send(&mut service, get("/x", &[])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BODY);
    }
    assert_eq!(origin.calls(), 2);
    assert!(registry.flush("memory").await.is_err());
}

#[tokio::test]
async fn http1_codec_round_trips_through_layer() {
    let origin = Origin::new(StatusCode::OK).with_header("content-type", "application/json");
    let layer = CacheLayer::builder(memory_registry().await, route(&[]))
        .codec(Http1Codec)
        .build()
        .expect("layer");
    let mut service = layer.layer(origin.clone());

    send(&mut service, get("/x", &[])).await;
    let (status, headers, body) = send(&mut service, get("/x", &[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(body, BODY);
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn routes_share_a_connection() {
    let origin = Origin::new(StatusCode::OK);
    let registry = memory_registry().await;
    let first = CacheLayer::new(registry.clone(), route(&[])).expect("layer");
    let second = CacheLayer::new(registry, route(&[])).expect("layer");

    let mut a = first.layer(origin.clone());
    let mut b = second.layer(origin.clone());

    send(&mut a, get("/shared", &[])).await;
    send(&mut b, get("/shared", &[])).await;
    assert_eq!(origin.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_independent() {
    let origin = Origin::new(StatusCode::OK);
    let layer = CacheLayer::new(memory_registry().await, route(&["X-Tenant"])).expect("layer");

    let tenants = ["a", "b", "c", "d"];
    let mut tasks = Vec::new();
    for tenant in tenants {
        for _ in 0..5 {
            let mut service = layer.clone().layer(origin.clone());
            tasks.push(tokio::spawn(async move {
                send(&mut service, get("/x", &[("x-tenant", tenant)])).await
            }));
        }
    }

    for task in tasks {
        let (status, _, body) = task.await.expect("task joined");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BODY);
    }

    let calls = origin.calls();
    assert!(
        (tenants.len()..=tenants.len() * 5).contains(&calls),
        "every tenant reached the origin at least once, got {calls}"
    );

    for tenant in tenants {
        let mut service = layer.clone().layer(origin.clone());
        send(&mut service, get("/x", &[("x-tenant", tenant)])).await;
    }
    assert_eq!(origin.calls(), calls, "all tenants cached afterwards");
}
