//! Static service discovery
//!
//! The endpoint list comes straight from configuration: parallel arrays of
//! URLs and model names, with optional labels, model types and an alias
//! table. An optional health-check worker probes each backend once a minute
//! and hides failing `(url, model)` pairs from snapshots until they recover.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::ServiceDiscovery;
use crate::errors::DiscoveryError;
use crate::models::{EndpointInfo, ModelType};
use crate::utils::time::now_epoch_secs;
use crate::utils::validate_url;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured backend entry.
#[derive(Debug, Clone)]
struct StaticBackend {
    url: String,
    model: String,
    model_label: Option<String>,
    model_type: ModelType,
}

pub struct StaticServiceDiscovery {
    backends: Vec<StaticBackend>,
    aliases: Option<HashMap<String, String>>,
    added_timestamp: i64,
    /// `(url, model)` pairs that failed their last health probe
    unhealthy: Arc<RwLock<HashSet<(String, String)>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StaticServiceDiscovery {
    /// Build from parallel configuration arrays.
    ///
    /// Array lengths must match; a mismatch is a construction error. When
    /// `health_check` is set, a background worker starts probing the
    /// backends immediately.
    pub fn new(
        urls: Vec<String>,
        models: Vec<String>,
        aliases: Option<HashMap<String, String>>,
        model_labels: Option<Vec<String>>,
        model_types: Option<Vec<ModelType>>,
        health_check: bool,
        client: reqwest::Client,
    ) -> Result<Self, DiscoveryError> {
        if urls.len() != models.len() {
            return Err(DiscoveryError::MismatchedLengths {
                field: "models".to_string(),
                expected: urls.len(),
                actual: models.len(),
            });
        }
        if let Some(labels) = &model_labels
            && labels.len() != urls.len()
        {
            return Err(DiscoveryError::MismatchedLengths {
                field: "model_labels".to_string(),
                expected: urls.len(),
                actual: labels.len(),
            });
        }
        if let Some(types) = &model_types
            && types.len() != urls.len()
        {
            return Err(DiscoveryError::MismatchedLengths {
                field: "model_types".to_string(),
                expected: urls.len(),
                actual: types.len(),
            });
        }
        if let Some(bad) = urls.iter().find(|url| !validate_url(url)) {
            return Err(DiscoveryError::InvalidUrl { url: bad.clone() });
        }

        let backends: Vec<StaticBackend> = urls
            .into_iter()
            .enumerate()
            .map(|(i, url)| StaticBackend {
                url,
                model: models[i].clone(),
                model_label: model_labels.as_ref().map(|labels| labels[i].clone()),
                model_type: model_types
                    .as_ref()
                    .map_or(ModelType::Chat, |types| types[i]),
            })
            .collect();

        let unhealthy = Arc::new(RwLock::new(HashSet::new()));
        let cancel = CancellationToken::new();

        let worker = if health_check {
            info!(
                "Starting static endpoint health checker for {} backend(s)",
                backends.len()
            );
            Some(tokio::spawn(health_check_worker(
                backends.clone(),
                client,
                Arc::clone(&unhealthy),
                cancel.clone(),
            )))
        } else {
            None
        };

        Ok(Self {
            backends,
            aliases,
            added_timestamp: now_epoch_secs(),
            unhealthy,
            cancel,
            worker: Mutex::new(worker),
        })
    }
}

#[async_trait]
impl ServiceDiscovery for StaticServiceDiscovery {
    fn get_endpoints(&self) -> Vec<EndpointInfo> {
        let unhealthy = self.unhealthy.read().expect("health set lock poisoned");

        // Group entries by URL; a backend serving several models appears
        // once with the union of its healthy model names.
        let mut by_url: BTreeMap<String, EndpointInfo> = BTreeMap::new();
        for backend in &self.backends {
            if unhealthy.contains(&(backend.url.clone(), backend.model.clone())) {
                continue;
            }
            by_url
                .entry(backend.url.clone())
                .and_modify(|endpoint| {
                    endpoint.model_names.insert(backend.model.clone());
                })
                .or_insert_with(|| EndpointInfo {
                    url: backend.url.clone(),
                    model_names: BTreeSet::from([backend.model.clone()]),
                    model_label: backend.model_label.clone(),
                    added_timestamp: self.added_timestamp,
                    healthy: true,
                    model_info: None,
                });
        }

        by_url.into_values().collect()
    }

    fn aliases(&self) -> Option<HashMap<String, String>> {
        self.aliases.clone()
    }

    fn get_health(&self) -> bool {
        let worker = self.worker.lock().expect("health worker lock poisoned");
        match worker.as_ref() {
            Some(handle) => !self.cancel.is_cancelled() && !handle.is_finished(),
            // No health checker configured; the static list is always live.
            None => true,
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .expect("health worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn health_check_worker(
    backends: Vec<StaticBackend>,
    client: reqwest::Client,
    unhealthy: Arc<RwLock<HashSet<(String, String)>>>,
    cancel: CancellationToken,
) {
    // First round runs immediately so snapshots start truthful.
    loop {
        let mut failed = HashSet::new();
        for backend in &backends {
            if cancel.is_cancelled() {
                return;
            }
            if !probe_backend(&client, backend).await {
                warn!(
                    url = %backend.url,
                    model = %backend.model,
                    "Health check failed, hiding endpoint from snapshots"
                );
                failed.insert((backend.url.clone(), backend.model.clone()));
            }
        }
        *unhealthy.write().expect("health set lock poisoned") = failed;

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Static endpoint health checker stopping");
                return;
            }
            _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => {}
        }
    }
}

/// Issue a minimal well-formed request to the backend; 2xx means healthy.
async fn probe_backend(client: &reqwest::Client, backend: &StaticBackend) -> bool {
    let url = format!("{}{}", backend.url, backend.model_type.probe_path());
    let body = backend.model_type.probe_body(&backend.model);
    match client
        .post(&url)
        .json(&body)
        .timeout(HEALTH_CHECK_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("Health probe of {url} failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn mismatched_lengths_are_rejected() {
        let result = StaticServiceDiscovery::new(
            vec!["http://engine1:8000".to_string()],
            vec!["m1".to_string(), "m2".to_string()],
            None,
            None,
            None,
            false,
            client(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn snapshot_lists_each_url_once() {
        let discovery = StaticServiceDiscovery::new(
            vec![
                "http://engine1:8000".to_string(),
                "http://engine1:8000".to_string(),
                "http://engine2:8000".to_string(),
            ],
            vec!["m1".to_string(), "m1-lora".to_string(), "m1".to_string()],
            None,
            None,
            None,
            false,
            client(),
        )
        .unwrap();

        let endpoints = discovery.get_endpoints();
        assert_eq!(endpoints.len(), 2);

        let engine1 = endpoints
            .iter()
            .find(|e| e.url == "http://engine1:8000")
            .unwrap();
        assert!(engine1.serves_model("m1"));
        assert!(engine1.serves_model("m1-lora"));
    }

    #[tokio::test]
    async fn aliases_are_exposed() {
        let aliases: HashMap<String, String> =
            [("gpt-4".to_string(), "m1".to_string())].into_iter().collect();
        let discovery = StaticServiceDiscovery::new(
            vec!["http://engine1:8000".to_string()],
            vec!["m1".to_string()],
            Some(aliases),
            None,
            None,
            false,
            client(),
        )
        .unwrap();

        let aliases = discovery.aliases().unwrap();
        assert_eq!(aliases["gpt-4"], "m1");
    }

    #[tokio::test]
    async fn healthy_without_checker() {
        let discovery = StaticServiceDiscovery::new(
            vec!["http://engine1:8000".to_string()],
            vec!["m1".to_string()],
            None,
            None,
            None,
            false,
            client(),
        )
        .unwrap();
        assert!(discovery.get_health());
    }
}
