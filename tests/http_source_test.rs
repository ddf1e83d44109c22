//! HTTP source tests against a local axum server.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flurry::config::{Config, SourceConfig};
use flurry::error::FetchError;
use flurry::pipeline::Pipeline;
use flurry::source::{HttpPageFetcher, PageFetcher};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use tokio::net::TcpListener;

#[derive(Deserialize)]
struct PageQuery {
    page: u32,
}

#[derive(Clone, Default)]
struct ServerState {
    throttled_calls: Arc<AtomicU32>,
}

async fn users(Query(q): Query<PageQuery>, headers: HeaderMap) -> Response {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("secret") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let first = (q.page - 1) * 2 + 1;
    Json(json!({
        "page": q.page,
        "data": [{ "id": first }, { "id": first + 1 }],
    }))
    .into_response()
}

async fn throttled(State(state): State<ServerState>, Query(q): Query<PageQuery>) -> Response {
    if state.throttled_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")]).into_response();
    }
    Json(json!({ "data": [{ "page": q.page }] })).into_response()
}

async fn broken() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "down").into_response()
}

async fn not_json() -> &'static str {
    "<html>nope</html>"
}

async fn serve() -> (SocketAddr, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/users", get(users))
        .route("/api/throttled", get(throttled))
        .route("/api/broken", get(broken))
        .route("/api/html", get(not_json))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, state)
}

fn source(addr: SocketAddr, path: &str) -> SourceConfig {
    serde_yaml::from_str(&format!(
        "url: 'http://{addr}{path}'\nstream: 1\npages: 2\nheaders:\n  x-api-key: secret\n"
    ))
    .unwrap()
}

fn fetcher(addr: SocketAddr, path: &str) -> HttpPageFetcher {
    HttpPageFetcher::from_config(reqwest::Client::new(), "test", &source(addr, path)).unwrap()
}

#[tokio::test]
async fn test_fetches_page_with_headers_and_query() {
    let (addr, _) = serve().await;
    let body = fetcher(addr, "/api/users").fetch_page(2).await.unwrap();
    assert_eq!(body["page"], json!(2));
    assert_eq!(body["data"][0]["id"], json!(3));
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (addr, _) = serve().await;
    let err = fetcher(addr, "/api/throttled").fetch_page(1).await.unwrap_err();
    assert!(matches!(
        err,
        FetchError::RateLimited {
            retry_after: Some(d)
        } if d.as_secs() == 1
    ));
}

#[tokio::test]
async fn test_error_status_and_bad_body() {
    let (addr, _) = serve().await;
    let err = fetcher(addr, "/api/broken").fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 503, .. }));

    let err = fetcher(addr, "/api/html").fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher(addr, "/api/users").fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Http { .. }));
}

#[tokio::test]
async fn test_pipeline_over_http_with_rate_limit() {
    let (addr, state) = serve().await;
    let dir = TempDir::new().unwrap();
    let out1 = dir.path().join("out1.ndjson");
    let out2 = dir.path().join("out2.ndjson");

    let yaml = format!(
        r#"
global:
  max_duration_secs: 30
  max_retries: 3
  backoff: {{ multiplier_ms: 10, min_ms: 10, max_ms: 50 }}
  pacing: {{ min_ms: 0, max_ms: 0 }}
streams: [1, 2]
sources:
  users:
    url: http://{addr}/api/users
    stream: 1
    pages: 3
    headers: {{ x-api-key: secret }}
  throttled:
    url: http://{addr}/api/throttled
    stream: 2
    pages: 1
    provenance_field: origin
outputs:
  out1: {{ stream: 1, path: '{}' }}
  out2: {{ stream: 2, path: '{}' }}
"#,
        out1.display(),
        out2.display()
    );
    let config = Config::parse(&yaml).unwrap();
    let client = config.http.build_client().unwrap();

    let summary = Pipeline::new(&config, client)
        .unwrap()
        .run_until(futures::stream::pending::<()>())
        .await;

    assert_eq!(summary.cancel_reason, None);
    assert_eq!(summary.failures(), 0);
    assert_eq!(summary.markers_sent, 2);
    assert_eq!(summary.records_written(), 7);
    // One throttled answer, then success.
    assert_eq!(state.throttled_calls.load(Ordering::SeqCst), 2);

    let lines: Vec<Value> = std::fs::read_to_string(&out1)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let ids: Vec<u64> = lines.iter().map(|l| l["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, [1, 2, 3, 4, 5, 6]);
    assert!(lines.iter().all(|l| l["_source"] == "users"));

    let throttled: Value =
        serde_json::from_str(std::fs::read_to_string(&out2).unwrap().trim()).unwrap();
    assert_eq!(throttled, json!({ "page": 1, "origin": "throttled" }));
}
