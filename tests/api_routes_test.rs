//! End-to-end routing through the full HTTP surface
//!
//! Each test stands up the real router with static discovery pointed at
//! wiremock backends, then drives it through tower's `oneshot`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_router::discovery::{ServiceDiscovery, StaticServiceDiscovery};
use llm_router::proxy::RouterContext;
use llm_router::routing::{RoundRobinRouter, RoutingPolicy, SessionRouter};
use llm_router::stats::{EngineStatsScraper, RequestStatsMonitor};
use llm_router::utils::now_secs;
use llm_router::web::{AppState, create_router};

fn test_context(
    urls: Vec<String>,
    models: Vec<String>,
    aliases: Option<HashMap<String, String>>,
    policy: RoutingPolicy,
) -> Arc<RouterContext> {
    let client = reqwest::Client::new();
    let discovery: Arc<dyn ServiceDiscovery> = Arc::new(
        StaticServiceDiscovery::new(urls, models, aliases, None, None, false, client.clone())
            .unwrap(),
    );
    let request_stats = Arc::new(RequestStatsMonitor::new(60.0));
    let engine_stats = Arc::new(EngineStatsScraper::new(
        Arc::clone(&discovery),
        client.clone(),
        Duration::from_secs(30),
    ));
    Arc::new(RouterContext {
        discovery,
        engine_stats,
        request_stats,
        policy,
        http_client: client,
    })
}

fn test_app(context: Arc<RouterContext>) -> Router {
    create_router(AppState { context })
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }

    let request = if let Some(body) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let response_headers = response.headers().clone();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, response_headers, json)
}

async fn mock_backend(label: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "served_by": label })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let context = test_context(
        vec!["http://a:8000".to_string()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, _, body) = send_request(&app, Method::GET, "/health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn version_endpoint_reports_package_version() {
    let context = test_context(
        vec!["http://a:8000".to_string()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, _, body) = send_request(&app, Method::GET, "/version", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn models_endpoint_lists_distinct_models() {
    let context = test_context(
        vec![
            "http://a:8000".to_string(),
            "http://b:8000".to_string(),
            "http://c:8000".to_string(),
        ],
        vec!["m1".to_string(), "m1".to_string(), "m2".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, _, body) = send_request(&app, Method::GET, "/v1/models", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");

    let mut ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|card| card["id"].as_str().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, ["m1", "m2"]);
    assert_eq!(body["data"][0]["object"], "model");
    assert_eq!(body["data"][0]["owned_by"], "vllm");
}

#[tokio::test]
async fn missing_model_field_is_rejected() {
    let context = test_context(
        vec!["http://a:8000".to_string()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, headers, body) = send_request(
        &app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({ "messages": [] })),
        &[("x-request-id", "req-42")],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Invalid request: missing 'model' in request body."
    );
    // The caller's request id is echoed back even on errors
    assert_eq!(headers.get("x-request-id").unwrap(), "req-42");
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let context = test_context(
        vec!["http://a:8000".to_string()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, _, body) = send_request(
        &app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({ "model": "m2", "messages": [] })),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Model m2 not found.");
}

#[tokio::test]
async fn round_robin_cycles_over_two_backends() {
    let backend_a = mock_backend("a").await;
    let backend_b = mock_backend("b").await;

    let mut sorted_uris = vec![backend_a.uri(), backend_b.uri()];
    sorted_uris.sort();

    let context = test_context(
        vec![backend_a.uri(), backend_b.uri()],
        vec!["m1".to_string(), "m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let mut served_by = Vec::new();
    for _ in 0..3 {
        let (status, _, body) = send_request(
            &app,
            Method::POST,
            "/v1/chat/completions",
            Some(json!({ "model": "m1", "messages": [{"role": "user", "content": "hi"}] })),
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        served_by.push(body["served_by"].as_str().unwrap().to_string());
    }

    // Backends are visited in sorted-URL order: first, second, first again
    let first = if sorted_uris[0] == backend_a.uri() { "a" } else { "b" };
    let second = if first == "a" { "b" } else { "a" };
    assert_eq!(served_by, [first, second, first]);
}

#[tokio::test]
async fn session_affinity_pins_requests_to_one_backend() {
    let backend_a = mock_backend("a").await;
    let backend_b = mock_backend("b").await;

    let context = test_context(
        vec![backend_a.uri(), backend_b.uri()],
        vec!["m1".to_string(), "m1".to_string()],
        None,
        RoutingPolicy::Session(SessionRouter::new("x-session-id".to_string())),
    );
    let app = test_app(context);

    let mut served_by = Vec::new();
    for _ in 0..3 {
        let (status, _, body) = send_request(
            &app,
            Method::POST,
            "/v1/chat/completions",
            Some(json!({ "model": "m1", "messages": [] })),
            &[("x-session-id", "s1")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        served_by.push(body["served_by"].as_str().unwrap().to_string());
    }

    assert_eq!(served_by[0], served_by[1]);
    assert_eq!(served_by[1], served_by[2]);
}

#[tokio::test]
async fn alias_rewrites_model_before_forwarding() {
    let backend = MockServer::start().await;
    // The backend only answers when the body carries the resolved name
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "model": "m1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&backend)
        .await;

    let aliases: HashMap<String, String> =
        [("gpt-4".to_string(), "m1".to_string())].into_iter().collect();
    let context = test_context(
        vec![backend.uri()],
        vec!["m1".to_string()],
        Some(aliases),
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, _, body) = send_request(
        &app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({ "model": "gpt-4", "messages": [] })),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn generated_request_id_is_set_on_responses() {
    let backend = mock_backend("a").await;
    let context = test_context(
        vec![backend.uri()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(context);

    let (status, headers, _) = send_request(
        &app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({ "model": "m1", "messages": [] })),
        &[],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let request_id = headers.get("x-request-id").unwrap().to_str().unwrap();
    assert!(!request_id.is_empty());
}

#[tokio::test]
async fn backend_errors_pass_through_unchanged() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": "engine exploded" })),
        )
        .mount(&backend)
        .await;

    let context = test_context(
        vec![backend.uri()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(Arc::clone(&context));

    let (status, _, body) = send_request(
        &app,
        Method::POST,
        "/v1/completions",
        Some(json!({ "model": "m1", "prompt": "hi" })),
        &[],
    )
    .await;

    // No retry, no rewriting: the backend's failure is the client's answer
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "engine exploded");

    // The failed request still completed in the stats
    let stats = context.request_stats.get_stats(now_secs());
    assert_eq!(stats[&backend.uri()].finished_requests, 1);
}

#[tokio::test]
async fn proxied_request_updates_lifecycle_stats() {
    let backend = mock_backend("a").await;
    let context = test_context(
        vec![backend.uri()],
        vec!["m1".to_string()],
        None,
        RoutingPolicy::RoundRobin(RoundRobinRouter::new()),
    );
    let app = test_app(Arc::clone(&context));

    let (status, _, _) = send_request(
        &app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({ "model": "m1", "messages": [] })),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stats = context.request_stats.get_stats(now_secs());
    let engine = &stats[&backend.uri()];
    assert_eq!(engine.finished_requests, 1);
    assert_eq!(engine.in_prefill_requests, 0);
    assert_eq!(engine.in_decoding_requests, 0);
    assert!(engine.ttft >= 0.0);
    assert!(engine.qps > 0.0);
}
