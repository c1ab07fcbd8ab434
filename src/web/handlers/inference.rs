//! Routed inference endpoints
//!
//! Thin handlers: each one names the backend path it mirrors and hands the
//! whole request to the streaming proxy. The proxy owns body inspection,
//! backend selection and response streaming.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Response, StatusCode};

use crate::proxy::route_general_request;
use crate::web::AppState;

/// Upper bound on buffered request bodies.
///
/// Inference request bodies are read fully before routing (the model field
/// lives inside), so runaway uploads are capped here rather than streamed.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub async fn chat_completions(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/v1/chat/completions", request).await
}

pub async fn completions(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/v1/completions", request).await
}

pub async fn embeddings(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/v1/embeddings", request).await
}

pub async fn rerank_v1(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/v1/rerank", request).await
}

pub async fn rerank(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/rerank", request).await
}

pub async fn score_v1(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/v1/score", request).await
}

pub async fn score(State(state): State<AppState>, request: Request) -> Response<Body> {
    proxy_to(state, "/score", request).await
}

async fn proxy_to(state: AppState, endpoint_path: &str, request: Request) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .header(axum::http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "error": format!("Failed to read request body: {e}") })
                        .to_string(),
                ))
                .expect("static response parts are valid");
        }
    };

    route_general_request(state.context, endpoint_path, parts.method, parts.headers, body).await
}
