//! Routing policies
//!
//! Given a snapshot of candidate endpoints and the current stats, a policy
//! picks the backend URL for one request. Policies are a closed set
//! expressed as an enum; adding a policy means adding a variant. They must
//! not mutate their input snapshots, and every decision returns a URL drawn
//! from the input endpoint list.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{RoutingConfig, RoutingPolicyKind};
use crate::errors::{AppError, AppResult};
use crate::models::{EndpointInfo, EngineStats, RequestStats};

/// The configured routing policy.
pub enum RoutingPolicy {
    RoundRobin(RoundRobinRouter),
    Session(SessionRouter),
}

impl RoutingPolicy {
    pub fn from_config(config: &RoutingConfig) -> AppResult<Self> {
        match config.policy {
            RoutingPolicyKind::RoundRobin => Ok(Self::RoundRobin(RoundRobinRouter::new())),
            RoutingPolicyKind::Session => {
                let session_key = config.session_key.clone().ok_or_else(|| {
                    AppError::configuration("session routing requires a session_key header name")
                })?;
                Ok(Self::Session(SessionRouter::new(session_key)))
            }
        }
    }

    /// Choose a backend URL for one request.
    ///
    /// `endpoints` must be non-empty; the proxy rejects model-less requests
    /// before routing. Returns None only on an empty candidate list.
    pub fn route(
        &self,
        endpoints: &[EndpointInfo],
        engine_stats: &HashMap<String, EngineStats>,
        request_stats: &HashMap<String, RequestStats>,
        headers: &HeaderMap,
    ) -> Option<String> {
        if endpoints.is_empty() {
            return None;
        }
        match self {
            Self::RoundRobin(router) => router.route(endpoints),
            Self::Session(router) => router.route(endpoints, engine_stats, request_stats, headers),
        }
    }
}

/// Cycles through the endpoints, sorted by URL for a deterministic order.
///
/// When fleet membership changes the mapping is not perfectly round-robin;
/// that is accepted.
pub struct RoundRobinRouter {
    counter: AtomicUsize,
}

impl RoundRobinRouter {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    pub fn route(&self, endpoints: &[EndpointInfo]) -> Option<String> {
        let sorted = sorted_by_url(endpoints);
        let turn = self.counter.fetch_add(1, Ordering::Relaxed);
        sorted.get(turn % sorted.len()).map(|e| e.url.clone())
    }
}

impl Default for RoundRobinRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Pins requests that carry a session header to one backend.
///
/// Unmapped sessions are placed by consistent hashing over the sorted
/// endpoint list; requests without a session header fall back to the
/// lowest-QPS endpoint and leave no mapping behind.
pub struct SessionRouter {
    session_key: String,
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionRouter {
    pub fn new(session_key: String) -> Self {
        Self {
            session_key,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn route(
        &self,
        endpoints: &[EndpointInfo],
        _engine_stats: &HashMap<String, EngineStats>,
        request_stats: &HashMap<String, RequestStats>,
        headers: &HeaderMap,
    ) -> Option<String> {
        let session_id = headers
            .get(self.session_key.as_str())
            .and_then(|value| value.to_str().ok());
        debug!("Got session id: {:?}", session_id);

        let sorted = sorted_by_url(endpoints);

        let Some(session_id) = session_id else {
            return qps_routing(&sorted, request_stats);
        };

        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        if let Some(url) = sessions.get(session_id)
            && sorted.iter().any(|e| &e.url == url)
        {
            return Some(url.clone());
        }

        // Unmapped, or the mapped endpoint left the fleet: re-place the
        // session by consistent hashing and remember the new home.
        let index = hash_to_index(session_id, sorted.len());
        let url = sorted[index].url.clone();
        sessions.insert(session_id.to_string(), url.clone());
        Some(url)
    }
}

/// Pick the endpoint with the lowest QPS.
///
/// An endpoint with no stats entry has served nothing yet and is taken
/// immediately, in iteration order.
fn qps_routing(
    endpoints: &[&EndpointInfo],
    request_stats: &HashMap<String, RequestStats>,
) -> Option<String> {
    let mut lowest_qps = f64::INFINITY;
    let mut chosen = None;
    for endpoint in endpoints {
        match request_stats.get(&endpoint.url) {
            None => return Some(endpoint.url.clone()),
            Some(stats) => {
                if stats.qps < lowest_qps {
                    lowest_qps = stats.qps;
                    chosen = Some(endpoint.url.clone());
                }
            }
        }
    }
    chosen
}

/// SHA-256 the session id and reduce it modulo `n`.
///
/// Matches treating the digest as one big integer mod `n`, so the same
/// session id maps to the same slot for a fixed endpoint set.
fn hash_to_index(session_id: &str, n: usize) -> usize {
    let digest = Sha256::digest(session_id.as_bytes());
    let n = n as u128;
    let remainder = digest
        .iter()
        .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % n);
    remainder as usize
}

fn sorted_by_url(endpoints: &[EndpointInfo]) -> Vec<&EndpointInfo> {
    let mut sorted: Vec<&EndpointInfo> = endpoints.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn endpoint(url: &str) -> EndpointInfo {
        EndpointInfo {
            url: url.to_string(),
            model_names: BTreeSet::from(["m1".to_string()]),
            model_label: None,
            added_timestamp: 0,
            healthy: true,
            model_info: None,
        }
    }

    fn stats(qps: f64) -> RequestStats {
        RequestStats {
            qps,
            ttft: -1.0,
            in_prefill_requests: 0,
            in_decoding_requests: 0,
            finished_requests: 0,
            uptime: 0.0,
            avg_decoding_length: -1.0,
            avg_latency: -1.0,
            avg_itl: -1.0,
            num_swapped_requests: 0,
        }
    }

    #[test]
    fn round_robin_cycles_in_sorted_order() {
        let router = RoundRobinRouter::new();
        // Deliberately unsorted input
        let endpoints = vec![endpoint("http://b:8000"), endpoint("http://a:8000")];

        let picks: Vec<String> = (0..3)
            .map(|_| router.route(&endpoints).unwrap())
            .collect();
        assert_eq!(picks, ["http://a:8000", "http://b:8000", "http://a:8000"]);
    }

    #[test]
    fn session_routing_is_sticky() {
        let router = SessionRouter::new("x-session-id".to_string());
        let endpoints = vec![endpoint("http://a:8000"), endpoint("http://b:8000")];
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", "abc123".parse().unwrap());

        let first = router
            .route(&endpoints, &HashMap::new(), &HashMap::new(), &headers)
            .unwrap();
        let second = router
            .route(&endpoints, &HashMap::new(), &HashMap::new(), &headers)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn session_fallback_prefers_lowest_qps() {
        let router = SessionRouter::new("x-session-id".to_string());
        let endpoints = vec![endpoint("http://a:8000"), endpoint("http://b:8000")];
        let request_stats: HashMap<String, RequestStats> = [
            ("http://a:8000".to_string(), stats(10.0)),
            ("http://b:8000".to_string(), stats(5.0)),
        ]
        .into_iter()
        .collect();

        let url = router
            .route(&endpoints, &HashMap::new(), &request_stats, &HeaderMap::new())
            .unwrap();
        assert_eq!(url, "http://b:8000");
    }

    #[test]
    fn session_fallback_takes_unseen_endpoint_first() {
        let router = SessionRouter::new("x-session-id".to_string());
        let endpoints = vec![endpoint("http://a:8000"), endpoint("http://b:8000")];
        let request_stats: HashMap<String, RequestStats> =
            [("http://a:8000".to_string(), stats(0.1))].into_iter().collect();

        let url = router
            .route(&endpoints, &HashMap::new(), &request_stats, &HeaderMap::new())
            .unwrap();
        assert_eq!(url, "http://b:8000");
    }

    #[test]
    fn single_endpoint_always_wins_the_hash() {
        let router = SessionRouter::new("x-session-id".to_string());
        let endpoints = vec![endpoint("http://only:8000")];
        for sid in ["s1", "s2", "another-session"] {
            let mut headers = HeaderMap::new();
            headers.insert("x-session-id", sid.parse().unwrap());
            let url = router
                .route(&endpoints, &HashMap::new(), &HashMap::new(), &headers)
                .unwrap();
            assert_eq!(url, "http://only:8000");
        }
    }

    #[test]
    fn empty_endpoint_list_yields_none() {
        let policy = RoutingPolicy::RoundRobin(RoundRobinRouter::new());
        assert!(
            policy
                .route(&[], &HashMap::new(), &HashMap::new(), &HeaderMap::new())
                .is_none()
        );
    }

    #[test]
    fn hash_to_index_is_stable() {
        let a = hash_to_index("abc123", 7);
        let b = hash_to_index("abc123", 7);
        assert_eq!(a, b);
        assert!(a < 7);
    }
}
