//! Request-level statistics monitor
//!
//! Event-driven view of per-engine request load. The streaming proxy fires
//! lifecycle events (`on_new_request`, `on_request_response`,
//! `on_request_complete`) from each handler; this component folds them into
//! sliding-window aggregates and live counters, keyed by engine URL.
//!
//! QPS counts arrivals in the window; TTFT, latency and decoding length are
//! computed from completed requests in the window. All operations serialize
//! on one internal lock and never touch I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::models::RequestStats;
use crate::stats::window::SlidingWindow;

/// In-flight request bookkeeping, keyed by `(engine_url, request_id)`.
#[derive(Debug, Clone)]
struct PendingRequest {
    start_time: f64,
    first_byte_time: Option<f64>,
}

#[derive(Default)]
struct MonitorInner {
    qps_windows: HashMap<String, SlidingWindow>,
    ttft_windows: HashMap<String, SlidingWindow>,
    latency_windows: HashMap<String, SlidingWindow>,
    decoding_windows: HashMap<String, SlidingWindow>,

    pending: HashMap<(String, String), PendingRequest>,

    in_prefill: HashMap<String, usize>,
    in_decoding: HashMap<String, usize>,
    finished: HashMap<String, u64>,
    swapped: HashMap<String, u64>,

    first_query_time: Option<f64>,
}

/// Monitors the request statistics of all serving engines.
pub struct RequestStatsMonitor {
    window_secs: f64,
    inner: Mutex<MonitorInner>,
}

impl RequestStatsMonitor {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            inner: Mutex::new(MonitorInner::default()),
        }
    }

    /// A request has been dispatched to `engine_url`.
    pub fn on_new_request(&self, engine_url: &str, request_id: &str, timestamp: f64) {
        let mut inner = self.inner.lock().expect("request stats lock poisoned");

        inner.pending.insert(
            (engine_url.to_string(), request_id.to_string()),
            PendingRequest {
                start_time: timestamp,
                first_byte_time: None,
            },
        );

        *inner.in_prefill.entry(engine_url.to_string()).or_insert(0) += 1;

        let window_secs = self.window_secs;
        inner
            .qps_windows
            .entry(engine_url.to_string())
            .or_insert_with(|| SlidingWindow::new(window_secs))
            .update(timestamp, 1.0);

        if inner.first_query_time.is_none() {
            inner.first_query_time = Some(timestamp);
        }
    }

    /// The first response byte for a request has arrived.
    ///
    /// Unknown `(engine_url, request_id)` pairs are ignored; the proxy
    /// always fires `on_new_request` first for well-formed flows.
    pub fn on_request_response(&self, engine_url: &str, request_id: &str, timestamp: f64) {
        let mut inner = self.inner.lock().expect("request stats lock poisoned");

        let key = (engine_url.to_string(), request_id.to_string());
        let start_time = match inner.pending.get_mut(&key) {
            Some(pending) => {
                pending.first_byte_time = Some(timestamp);
                pending.start_time
            }
            None => return,
        };

        let prefill = inner.in_prefill.entry(engine_url.to_string()).or_insert(0);
        *prefill = prefill.saturating_sub(1);
        *inner.in_decoding.entry(engine_url.to_string()).or_insert(0) += 1;

        let window_secs = self.window_secs;
        inner
            .ttft_windows
            .entry(engine_url.to_string())
            .or_insert_with(|| SlidingWindow::new(window_secs))
            .update(timestamp, timestamp - start_time);
    }

    /// A request finished, successfully or not.
    pub fn on_request_complete(&self, engine_url: &str, request_id: &str, timestamp: f64) {
        let mut inner = self.inner.lock().expect("request stats lock poisoned");

        let key = (engine_url.to_string(), request_id.to_string());
        let pending = inner.pending.remove(&key);
        if pending.is_none() {
            warn!(
                engine_url,
                request_id, "Completion event for unknown request"
            );
        }

        let decoding = inner.in_decoding.entry(engine_url.to_string()).or_insert(0);
        *decoding = decoding.saturating_sub(1);
        *inner.finished.entry(engine_url.to_string()).or_insert(0) += 1;

        if let Some(pending) = pending {
            let window_secs = self.window_secs;
            inner
                .latency_windows
                .entry(engine_url.to_string())
                .or_insert_with(|| SlidingWindow::new(window_secs))
                .update(timestamp, timestamp - pending.start_time);

            if let Some(first_byte) = pending.first_byte_time {
                inner
                    .decoding_windows
                    .entry(engine_url.to_string())
                    .or_insert_with(|| SlidingWindow::new(window_secs))
                    .update(timestamp, timestamp - first_byte);
            }
        }
    }

    /// The engine reported this request swapped from GPU to CPU.
    pub fn on_request_swapped(&self, engine_url: &str, _request_id: &str, _timestamp: f64) {
        let mut inner = self.inner.lock().expect("request stats lock poisoned");
        *inner.swapped.entry(engine_url.to_string()).or_insert(0) += 1;
    }

    /// Snapshot the per-engine request statistics as of `now`.
    ///
    /// Touches every window with `now` first, so stale entries are evicted
    /// before the aggregates are computed. Idempotent for a fixed `now`.
    pub fn get_stats(&self, now: f64) -> HashMap<String, RequestStats> {
        let mut inner = self.inner.lock().expect("request stats lock poisoned");

        let mut urls: Vec<String> = inner
            .in_prefill
            .keys()
            .chain(inner.in_decoding.keys())
            .chain(inner.finished.keys())
            .chain(inner.qps_windows.keys())
            .cloned()
            .collect();
        urls.sort();
        urls.dedup();

        let window_secs = self.window_secs;
        let first_query_time = inner.first_query_time;
        let mut stats = HashMap::with_capacity(urls.len());

        for url in urls {
            let qps = match inner.qps_windows.get_mut(&url) {
                Some(window) => {
                    window.touch(now);
                    window.sum() / window_secs
                }
                None => 0.0,
            };
            let ttft = match inner.ttft_windows.get_mut(&url) {
                Some(window) => {
                    window.touch(now);
                    window.average()
                }
                None => -1.0,
            };
            let avg_latency = match inner.latency_windows.get_mut(&url) {
                Some(window) => {
                    window.touch(now);
                    window.average()
                }
                None => -1.0,
            };
            let avg_decoding_length = match inner.decoding_windows.get_mut(&url) {
                Some(window) => {
                    window.touch(now);
                    window.average()
                }
                None => -1.0,
            };

            stats.insert(
                url.clone(),
                RequestStats {
                    qps,
                    ttft,
                    in_prefill_requests: inner.in_prefill.get(&url).copied().unwrap_or(0),
                    in_decoding_requests: inner.in_decoding.get(&url).copied().unwrap_or(0),
                    finished_requests: inner.finished.get(&url).copied().unwrap_or(0),
                    uptime: first_query_time.map_or(0.0, |first| now - first),
                    avg_decoding_length,
                    avg_latency,
                    // Inter-token latency is not derivable from the proxied
                    // byte stream without reframing it, which the proxy
                    // deliberately never does.
                    avg_itl: -1.0,
                    num_swapped_requests: inner.swapped.get(&url).copied().unwrap_or(0),
                },
            );
        }

        stats
    }
}
