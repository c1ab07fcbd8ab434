//! Core data model
//!
//! Value types shared between service discovery, the stats subsystem, the
//! routing policies and the web layer. Components exchange these by value;
//! none of them carries interior mutability.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The kind of workload a backend model serves.
///
/// Used by the static-discovery health checker to pick a probe endpoint
/// that the model will actually answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Chat,
    Completion,
    Embeddings,
    Rerank,
    Score,
}

impl ModelType {
    /// API path probed by the health checker for this model type.
    pub fn probe_path(&self) -> &'static str {
        match self {
            ModelType::Chat => "/v1/chat/completions",
            ModelType::Completion => "/v1/completions",
            ModelType::Embeddings => "/v1/embeddings",
            ModelType::Rerank => "/v1/rerank",
            ModelType::Score => "/v1/score",
        }
    }

    /// Minimal well-formed request body for a health probe of `model`.
    pub fn probe_body(&self, model: &str) -> serde_json::Value {
        match self {
            ModelType::Chat => serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": "ping"}],
                "max_tokens": 1,
            }),
            ModelType::Completion => serde_json::json!({
                "model": model,
                "prompt": "ping",
                "max_tokens": 1,
            }),
            ModelType::Embeddings => serde_json::json!({
                "model": model,
                "input": "ping",
            }),
            ModelType::Rerank | ModelType::Score => serde_json::json!({
                "model": model,
                "query": "ping",
                "documents": ["ping"],
            }),
        }
    }
}

/// Per-model descriptor carrying adapter relationships.
///
/// `parent` names the base model an adapter is attached to; base models
/// have no parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub parent: Option<String>,
    pub is_adapter: bool,
}

/// One serving backend as seen by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Absolute base URL of the backend's OpenAI-compatible API
    pub url: String,
    /// Model identifiers served by this backend, base models and adapters alike
    pub model_names: BTreeSet<String>,
    /// Opaque deployment label, e.g. from the pod's `model` label
    pub model_label: Option<String>,
    /// Seconds since epoch when this endpoint was first observed healthy
    pub added_timestamp: i64,
    /// Last observed health
    pub healthy: bool,
    /// Per-model descriptors, when the backend exposes them
    pub model_info: Option<Vec<ModelInfo>>,
}

impl EndpointInfo {
    pub fn serves_model(&self, model: &str) -> bool {
        self.model_names.contains(model)
    }
}

/// Last-scraped physical load of one engine.
///
/// Overwritten wholesale on every scrape round; missing metrics stay at
/// their zero defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub num_running_requests: u64,
    pub num_queuing_requests: u64,
    pub gpu_prefix_cache_hit_rate: f64,
    pub gpu_cache_usage_perc: f64,
}

/// Per-engine request statistics over the sliding window.
///
/// Averages report `-1.0` when the corresponding window holds no samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStats {
    /// Arrivals in the window divided by the window size
    pub qps: f64,
    /// Mean time-to-first-token over completed windowed requests
    pub ttft: f64,
    /// Requests currently waiting for their first response byte
    pub in_prefill_requests: usize,
    /// Requests currently streaming their response
    pub in_decoding_requests: usize,
    /// Requests finished since process start
    pub finished_requests: u64,
    /// Seconds since this engine first received a request
    pub uptime: f64,
    /// Mean time from first byte to completion
    pub avg_decoding_length: f64,
    /// Mean time from arrival to completion
    pub avg_latency: f64,
    /// Mean inter-token latency; -1 when not computed
    pub avg_itl: f64,
    /// Engine swap events observed
    pub num_swapped_requests: u64,
}

/// OpenAI-compatible model descriptor served by `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// OpenAI-compatible model list envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

/// One entry of a backend's `GET /v1/models` response.
///
/// Only the fields discovery cares about; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendModelEntry {
    pub id: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Backend `GET /v1/models` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendModelList {
    pub data: Vec<BackendModelEntry>,
}
