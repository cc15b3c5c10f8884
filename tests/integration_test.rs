//! Integration tests for the record-replay cycle over real sockets

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use cassette_proxy::cassette::{CassetteOptions, RecordMode};
use cassette_proxy::config::{Config, LimitsConfig};
use cassette_proxy::fingerprint::fingerprint;
use cassette_proxy::headers::default_rules;
use cassette_proxy::network::{ProxyServer, HEALTH_BODY};
use cassette_proxy::proxy::CassetteProxy;
use cassette_proxy::request::{Body, Method, RequestDescriptor};
use cassette_proxy::ProxyError;

/// Fake upstream service counting every request it receives
async fn spawn_upstream(hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let method = request.method().to_string();
                        let path = request.uri().path().to_string();
                        let query = request.uri().query().unwrap_or("").to_string();
                        let auth = request
                            .headers()
                            .get("authorization")
                            .map(|v| v.to_str().unwrap().to_string());
                        let leaked = request.headers().contains_key("x-custom");
                        let body = request.into_body().collect().await.unwrap().to_bytes();

                        let (status, payload) = match (method.as_str(), path.as_str()) {
                            ("GET", "/documents/42") => (200, r#"{"id":42}"#.to_string()),
                            ("GET", "/search") => (200, format!("query={query}")),
                            ("GET", "/whoami") => (200, format!("auth={auth:?} leaked={leaked}")),
                            ("POST", "/documents") => {
                                (201, format!("created:{}", String::from_utf8_lossy(&body)))
                            }
                            _ => (404, "missing".to_string()),
                        };

                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(payload)))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Upstream that accepts connections and never answers
async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    addr
}

fn get(path: &str) -> RequestDescriptor {
    RequestDescriptor {
        method: Method::Get,
        path: path.to_string(),
        headers: vec![],
        body: Body::Form(vec![]),
    }
}

fn test_config(cassette_dir: &TempDir, upstream: SocketAddr) -> Config {
    Config {
        cassette_dir: cassette_dir.path().to_path_buf(),
        upstream: format!("http://{upstream}"),
        listen_port: 9292,
        cassettes: CassetteOptions::default(),
        headers: default_rules(),
        limits: LimitsConfig::default(),
    }
}

/// Running proxy front-end
struct Harness {
    addr: SocketAddr,
    proxy: Arc<CassetteProxy>,
    shutdown: broadcast::Sender<()>,
}

impl Harness {
    async fn start(config: &Config) -> Self {
        let proxy = Arc::new(CassetteProxy::from_config(config).unwrap());
        let server = ProxyServer::new(Arc::clone(&proxy), config);
        let shutdown = server.shutdown_handle();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        Self {
            addr,
            proxy,
            shutdown,
        }
    }

    async fn send(
        &self,
        method: &str,
        path_and_query: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> (u16, String) {
        let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("http://{}{path_and_query}", self.addr));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();

        let response = client.request(request).await.unwrap();
        let status = response.status().as_u16();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.send(()).ok();
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let harness = Harness::start(&test_config(&temp_dir, upstream)).await;

    let (status, body) = harness.send("GET", "/", &[], "").await;

    assert_eq!(status, 200);
    assert_eq!(body, HEALTH_BODY);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(harness.proxy.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_first_get_records_second_replays() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let harness = Harness::start(&test_config(&temp_dir, upstream)).await;

    // Scenario 1: empty store, upstream called and recorded
    let (status, body) = harness.send("GET", "/documents/42", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"id":42}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let cassette_file = temp_dir
        .path()
        .join(format!("{}.yml", fingerprint(Method::Get, "/documents/42")));
    assert!(cassette_file.exists(), "Cassette file should exist");
    let content = std::fs::read_to_string(&cassette_file).unwrap();
    assert!(content.contains("/documents/42"));

    // Scenario 2: identical request served from the cassette
    let (status, body) = harness.send("GET", "/documents/42", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"id":42}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let stats = harness.proxy.stats();
    assert_eq!(stats.recorded, 1);
    assert_eq!(stats.replayed, 1);
}

#[tokio::test]
async fn test_post_is_distinct_cassette() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let harness = Harness::start(&test_config(&temp_dir, upstream)).await;

    harness.send("GET", "/documents", &[], "").await;
    assert_eq!(harness.proxy.store().list().unwrap().len(), 1);

    // Scenario 3: POST to the same path gets its own cassette
    let (status, body) = harness
        .send(
            "POST",
            "/documents",
            &[("content-type", "application/json")],
            r#"{"name":"x"}"#,
        )
        .await;

    assert_eq!(status, 201);
    assert_eq!(body, r#"created:{"name":"x"}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let mut expected = vec![
        fingerprint(Method::Get, "/documents"),
        fingerprint(Method::Post, "/documents"),
    ];
    expected.sort();
    assert_eq!(harness.proxy.store().list().unwrap(), expected);
}

#[tokio::test]
async fn test_options_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let harness = Harness::start(&test_config(&temp_dir, upstream)).await;

    // Scenario 4: unsupported method, nothing called or written
    let (status, body) = harness.send("OPTIONS", "/documents", &[], "").await;

    assert_eq!(status, 405);
    assert!(body.contains("Unsupported HTTP method"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(harness.proxy.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_query_and_headers_forwarded() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let harness = Harness::start(&test_config(&temp_dir, upstream)).await;

    let (_, body) = harness.send("GET", "/search?q=a+b&page=2", &[], "").await;
    assert_eq!(body, "query=q=a%20b&page=2");

    let (_, body) = harness
        .send(
            "GET",
            "/whoami",
            &[("authorization", "Bearer abc"), ("x-custom", "secret")],
            "",
        )
        .await;
    assert_eq!(body, r#"auth=Some("Bearer abc") leaked=false"#);
}

#[tokio::test]
async fn test_replay_survives_restart_without_upstream() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;

    {
        let harness = Harness::start(&test_config(&temp_dir, upstream)).await;
        harness.send("GET", "/documents/42", &[], "").await;
    }

    // Nothing listens on port 9; only the cassette can answer
    let mut config = test_config(&temp_dir, "127.0.0.1:9".parse().unwrap());
    config.limits.upstream_timeout_ms = 2_000;
    let harness = Harness::start(&config).await;

    let (status, body) = harness.send("GET", "/documents/42", &[], "").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"id":42}"#);

    let (status, _) = harness.send("GET", "/documents/43", &[], "").await;
    assert_eq!(status, 502);
    assert_eq!(harness.proxy.store().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_only_proxy_fails_closed() {
    let temp_dir = TempDir::new().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let upstream = spawn_upstream(Arc::clone(&hits)).await;
    let config = test_config(&temp_dir, upstream);

    let proxy = CassetteProxy::from_config(&config)
        .unwrap()
        .with_record_mode(RecordMode::None);

    let result = proxy.handle(get("/documents/42")).await;

    assert!(matches!(result, Err(ProxyError::NoCassetteMatch { .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upstream_timeout_records_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let upstream = spawn_silent_upstream().await;
    let mut config = test_config(&temp_dir, upstream);
    config.limits.upstream_timeout_ms = 200;
    let proxy = CassetteProxy::from_config(&config).unwrap();

    let started = Instant::now();
    let result = proxy.handle(get("/slow")).await;

    match result {
        Err(ProxyError::Upstream(message)) => assert!(message.contains("timed out")),
        other => panic!("expected upstream timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(proxy.store().list().unwrap().is_empty());
    assert_eq!(proxy.stats().failed, 1);
}
