//! Periodic fleet statistics logging
//!
//! A low-frequency background worker that prints a per-endpoint summary of
//! the engine and request statistics to the log. Operators get a readable
//! pulse of the fleet without scraping anything themselves.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::discovery::ServiceDiscovery;
use crate::stats::{EngineStatsScraper, RequestStatsMonitor};
use crate::utils::now_secs;

/// Logs a fleet summary on a fixed interval until closed.
pub struct StatsLogger {
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StatsLogger {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        engine_stats: Arc<EngineStatsScraper>,
        request_stats: Arc<RequestStatsMonitor>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(log_worker(
            discovery,
            engine_stats,
            request_stats,
            interval,
            cancel.clone(),
        ));
        Self {
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .expect("stats logger lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn log_worker(
    discovery: Arc<dyn ServiceDiscovery>,
    engine_stats: Arc<EngineStatsScraper>,
    request_stats: Arc<RequestStatsMonitor>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stats logger stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        info!("{}", fleet_summary(&discovery, &engine_stats, &request_stats));
    }
}

fn fleet_summary(
    discovery: &Arc<dyn ServiceDiscovery>,
    engine_stats: &Arc<EngineStatsScraper>,
    request_stats: &Arc<RequestStatsMonitor>,
) -> String {
    let endpoints = discovery.get_endpoints();
    let engine_stats = engine_stats.get_stats();
    let request_stats = request_stats.get_stats(now_secs());

    let mut summary = format!("\n{}\n", "=".repeat(50));
    for endpoint in endpoints {
        let models: Vec<&str> = endpoint.model_names.iter().map(String::as_str).collect();
        summary.push_str(&format!("Models: {}\n", models.join(", ")));
        summary.push_str(&format!("Server: {}\n", endpoint.url));

        match engine_stats.get(&endpoint.url) {
            Some(es) => summary.push_str(&format!(
                " Engine Stats: Running Requests: {}, Queued Requests: {}, \
                 GPU Cache Hit Rate: {:.2}\n",
                es.num_running_requests, es.num_queuing_requests, es.gpu_prefix_cache_hit_rate
            )),
            None => summary.push_str(" Engine Stats: No stats available\n"),
        }
        match request_stats.get(&endpoint.url) {
            Some(rs) => summary.push_str(&format!(
                " Request Stats: QPS: {:.2}, Avg Latency: {}, Avg ITL: {}, \
                 Prefill Requests: {}, Decoding Requests: {}, Swapped Requests: {}, \
                 Finished: {}, Uptime: {:.2} sec\n",
                rs.qps,
                rs.avg_latency,
                rs.avg_itl,
                rs.in_prefill_requests,
                rs.in_decoding_requests,
                rs.num_swapped_requests,
                rs.finished_requests,
                rs.uptime
            )),
            None => summary.push_str(" Request Stats: No stats available\n"),
        }
        summary.push_str(&format!("{}\n", "-".repeat(50)));
    }
    summary.push_str(&format!("{}\n", "=".repeat(50)));
    summary
}
