//! Engine stats scraper
//!
//! A background worker that polls each discovered engine's Prometheus
//! `/metrics` endpoint on a fixed interval and keeps the latest parsed
//! snapshot. Engines that disappear from discovery, or fail a round, fall
//! out of the snapshot after the next round completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::discovery::ServiceDiscovery;
use crate::errors::ScrapeError;
use crate::models::EngineStats;
use crate::stats::prometheus::parse_samples;

/// Build an `EngineStats` from a scraped exposition page.
///
/// Metrics the page does not carry stay at their zero defaults.
fn engine_stats_from_scrape(page: &str) -> EngineStats {
    let mut stats = EngineStats::default();
    for sample in parse_samples(page) {
        match sample.name.as_str() {
            "vllm:num_requests_running" => stats.num_running_requests = sample.value.max(0.0) as u64,
            "vllm:num_requests_waiting" => stats.num_queuing_requests = sample.value.max(0.0) as u64,
            "vllm:gpu_prefix_cache_hit_rate" => stats.gpu_prefix_cache_hit_rate = sample.value,
            "vllm:gpu_cache_usage_perc" => stats.gpu_cache_usage_perc = sample.value,
            _ => {}
        }
    }
    stats
}

/// Periodically scrapes `/metrics` from every discovered engine.
pub struct EngineStatsScraper {
    stats: Arc<RwLock<HashMap<String, EngineStats>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EngineStatsScraper {
    /// Create the scraper and start its background worker.
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        client: reqwest::Client,
        scrape_interval: Duration,
    ) -> Self {
        let stats = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let api_key = std::env::var("VLLM_API_KEY").ok();

        let worker = tokio::spawn(scrape_worker(
            discovery,
            client,
            scrape_interval,
            Arc::clone(&stats),
            cancel.clone(),
            api_key,
        ));

        Self {
            stats,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Point-in-time copy of the last completed scrape round.
    pub fn get_stats(&self) -> HashMap<String, EngineStats> {
        self.stats.read().expect("engine stats lock poisoned").clone()
    }

    /// True while the scrape worker is running.
    pub fn get_health(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.worker
            .lock()
            .expect("scraper worker lock poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the worker and wait for it to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .expect("scraper worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn scrape_worker(
    discovery: Arc<dyn ServiceDiscovery>,
    client: reqwest::Client,
    scrape_interval: Duration,
    stats: Arc<RwLock<HashMap<String, EngineStats>>>,
    cancel: CancellationToken,
    api_key: Option<String>,
) {
    loop {
        scrape_round(&discovery, &client, scrape_interval, &stats, &api_key).await;

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Engine stats scraper stopping");
                return;
            }
            _ = tokio::time::sleep(scrape_interval) => {}
        }
    }
}

/// Scrape every engine once and atomically replace the stats map.
///
/// URLs absent from this round drop out of the map, which is how engines
/// that vanished from discovery leave the stats view.
async fn scrape_round(
    discovery: &Arc<dyn ServiceDiscovery>,
    client: &reqwest::Client,
    scrape_interval: Duration,
    stats: &Arc<RwLock<HashMap<String, EngineStats>>>,
    api_key: &Option<String>,
) {
    let mut urls: Vec<String> = discovery
        .get_endpoints()
        .into_iter()
        .map(|endpoint| endpoint.url)
        .collect();
    urls.sort();
    urls.dedup();

    debug!("Scraping metrics from {} serving engine(s)", urls.len());

    let scrapes = urls.iter().map(|url| {
        let client = client.clone();
        let api_key = api_key.clone();
        async move {
            match scrape_one_endpoint(&client, url, scrape_interval, &api_key).await {
                Ok(engine_stats) => Some((url.clone(), engine_stats)),
                Err(e) => {
                    warn!("Failed to scrape metrics from {url}: {e}");
                    None
                }
            }
        }
    });

    let collected: HashMap<String, EngineStats> = futures::future::join_all(scrapes)
        .await
        .into_iter()
        .flatten()
        .collect();

    *stats.write().expect("engine stats lock poisoned") = collected;
}

async fn scrape_one_endpoint(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    api_key: &Option<String>,
) -> Result<EngineStats, ScrapeError> {
    let fetch_error = |e: reqwest::Error| ScrapeError::Fetch {
        url: url.to_string(),
        message: e.to_string(),
    };

    let mut request = client.get(format!("{url}/metrics")).timeout(timeout);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let response = request.send().await.map_err(fetch_error)?;
    if !response.status().is_success() {
        return Err(ScrapeError::BadStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let page = response.text().await.map_err(fetch_error)?;
    Ok(engine_stats_from_scrape(&page))
}
