//! Streaming request proxy
//!
//! The data plane: takes one incoming OpenAI-style request, picks a backend
//! through the routing policy, opens a streaming call to it and forwards
//! the response byte-for-byte. Request lifecycle events are fired into the
//! request-stats monitor from here: `on_new_request` before the upstream
//! call, `on_request_response` on the first non-empty chunk, and
//! `on_request_complete` when the stream ends for any reason, including a
//! client disconnect.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::discovery::ServiceDiscovery;
use crate::routing::RoutingPolicy;
use crate::stats::{EngineStatsScraper, RequestStatsMonitor};
use crate::utils::{now_secs, replace_model_in_request_body};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything a request handler needs, created once at startup.
///
/// Components stay process-wide but are always addressed through this
/// context, so tests can stand up isolated instances.
pub struct RouterContext {
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub engine_stats: Arc<EngineStatsScraper>,
    pub request_stats: Arc<RequestStatsMonitor>,
    pub policy: RoutingPolicy,
    pub http_client: reqwest::Client,
}

/// Route one request to a backend and stream the response back.
pub async fn route_general_request(
    context: Arc<RouterContext>,
    endpoint_path: &str,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let Ok(request_json) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid request: malformed JSON body.",
            &request_id,
        );
    };
    let Some(requested_model) = request_json.get("model").and_then(|m| m.as_str()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid request: missing 'model' in request body.",
            &request_id,
        );
    };
    let mut requested_model = requested_model.to_string();

    // Alias substitution rewrites the body; Content-Length is recomputed
    // when the forwarded request is built.
    let mut body = body;
    if let Some(aliases) = context.discovery.aliases()
        && let Some(target) = aliases.get(&requested_model)
    {
        debug!("Rewriting model alias {requested_model} -> {target}");
        requested_model = target.clone();
        body = Bytes::from(replace_model_in_request_body(request_json, target));
    }

    let endpoints: Vec<_> = context
        .discovery
        .get_endpoints()
        .into_iter()
        .filter(|endpoint| endpoint.serves_model(&requested_model))
        .collect();
    if endpoints.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Model {requested_model} not found."),
            &request_id,
        );
    }

    let engine_stats = context.engine_stats.get_stats();
    let request_stats = context.request_stats.get_stats(now_secs());
    let Some(backend_url) =
        context
            .policy
            .route(&endpoints, &engine_stats, &request_stats, &headers)
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Model {requested_model} not found."),
            &request_id,
        );
    };

    debug!("Routing request {request_id} for model {requested_model} to {backend_url}");

    context
        .request_stats
        .on_new_request(&backend_url, &request_id, now_secs());

    let upstream = open_upstream(
        &context.http_client,
        method,
        &backend_url,
        endpoint_path,
        &headers,
        body,
    )
    .await;

    let (status, upstream_headers, upstream_body) = match upstream {
        Ok(parts) => parts,
        Err(e) => {
            warn!("Failed to connect to backend {backend_url}: {e}");
            context
                .request_stats
                .on_request_complete(&backend_url, &request_id, now_secs());
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("Failed to connect to backend: {e}"),
                &request_id,
            );
        }
    };

    let guard = LifecycleGuard::new(
        Arc::clone(&context.request_stats),
        backend_url.clone(),
        request_id.clone(),
    );
    let body = Body::from_stream(forward_stream(upstream_body, guard));

    let mut response = Response::builder()
        .status(status)
        .body(body)
        .expect("static response parts are valid");
    *response.headers_mut() = filter_response_headers(&upstream_headers);
    set_request_id(response.headers_mut(), &request_id);
    response
}

/// Initiate the backend call and hand back status, headers and the lazy
/// chunk stream. No total timeout: streamed completions stay open as long
/// as the backend keeps sending.
async fn open_upstream(
    client: &reqwest::Client,
    method: Method,
    backend_url: &str,
    endpoint_path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap, BoxStream<'static, reqwest::Result<Bytes>>), reqwest::Error> {
    let response = client
        .request(method, format!("{backend_url}{endpoint_path}"))
        .headers(filter_request_headers(headers))
        .body(body)
        .send()
        .await?;

    let status = response.status();
    let headers = response.headers().clone();
    Ok((status, headers, response.bytes_stream().boxed()))
}

/// Forward upstream chunks, firing lifecycle events at the edges.
///
/// The guard fires the completion event when the stream is dropped, so a
/// client disconnect mid-stream still completes the request in the stats.
fn forward_stream(
    upstream: impl futures::Stream<Item = reqwest::Result<Bytes>>,
    mut guard: LifecycleGuard,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let mut upstream = std::pin::pin!(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    if !bytes.is_empty() {
                        guard.first_byte();
                    }
                    yield Ok(bytes);
                }
                Err(e) => {
                    warn!("Backend stream aborted: {e}");
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
        guard.complete();
    }
}

/// Fires `on_request_response` once and guarantees `on_request_complete`
/// fires exactly once, even when the response stream is dropped early.
struct LifecycleGuard {
    monitor: Arc<RequestStatsMonitor>,
    backend_url: String,
    request_id: String,
    responded: bool,
    completed: bool,
}

impl LifecycleGuard {
    fn new(monitor: Arc<RequestStatsMonitor>, backend_url: String, request_id: String) -> Self {
        Self {
            monitor,
            backend_url,
            request_id,
            responded: false,
            completed: false,
        }
    }

    fn first_byte(&mut self) {
        if !self.responded {
            self.responded = true;
            self.monitor
                .on_request_response(&self.backend_url, &self.request_id, now_secs());
        }
    }

    fn complete(mut self) {
        self.fire_complete();
    }

    fn fire_complete(&mut self) {
        if !self.completed {
            self.completed = true;
            self.monitor
                .on_request_complete(&self.backend_url, &self.request_id, now_secs());
        }
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.fire_complete();
    }
}

/// Copy request headers for the upstream call.
///
/// Hop-by-hop headers must not be forwarded; Host and Content-Length are
/// owned by the new connection and recomputed by the client.
fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in [
        header::HOST,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::CONNECTION,
        header::TE,
        header::TRAILER,
        header::UPGRADE,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
    ] {
        filtered.remove(name);
    }
    filtered.remove("keep-alive");
    filtered
}

/// Copy backend response headers for the client.
///
/// Framing is re-established by our own server, so the hop-by-hop set is
/// dropped; everything else passes through.
fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in [header::TRANSFER_ENCODING, header::CONNECTION] {
        filtered.remove(name);
    }
    filtered.remove("keep-alive");
    filtered
}

/// Every response carries the request id, echoed or generated.
fn set_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}

fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response<Body> {
    let payload = serde_json::json!({ "error": message });
    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("static response parts are valid");
    set_request_id(response.headers_mut(), request_id);
    response
}
