//! Standardized response payloads for the operational endpoints

use serde::{Deserialize, Serialize};

/// Payload served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_stats: Option<bool>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            discovery: None,
            engine_stats: None,
        }
    }

    pub fn unhealthy(discovery: bool, engine_stats: bool) -> Self {
        Self {
            status: "unhealthy".to_string(),
            discovery: Some(discovery),
            engine_stats: Some(engine_stats),
        }
    }
}

/// Payload served by `GET /version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}
