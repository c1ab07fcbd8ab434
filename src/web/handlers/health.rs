//! Health and version endpoints

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::web::AppState;
use crate::web::responses::{HealthResponse, VersionResponse};

/// `GET /health`
///
/// Healthy iff both background views are live: the service-discovery
/// worker and the engine-stats scraper.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let discovery_healthy = state.context.discovery.get_health();
    let scraper_healthy = state.context.engine_stats.get_health();

    if discovery_healthy && scraper_healthy {
        (StatusCode::OK, Json(HealthResponse::healthy()))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::unhealthy(discovery_healthy, scraper_healthy)),
        )
    }
}

/// `GET /version`
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
