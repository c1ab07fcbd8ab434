//! Kubernetes service discovery
//!
//! Watches engine pods in one namespace through the Kubernetes API and
//! keeps the endpoint map in step with pod lifecycle events. A pod counts
//! as an endpoint once every container reports ready and its model list is
//! readable from `GET /v1/models`; it leaves the map when it stops being
//! ready or is deleted. Watch-stream errors reconnect with a short backoff
//! and never drop already-known endpoints.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::runtime::watcher::{Config as WatcherConfig, Event, watcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::ServiceDiscovery;
use crate::errors::DiscoveryError;
use crate::models::{BackendModelList, EndpointInfo, ModelInfo};
use crate::utils::time::now_epoch_secs;

const WATCH_RETRY_DELAY: Duration = Duration::from_millis(500);
const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct K8sServiceDiscovery {
    /// Known engines keyed by pod name
    engines: Arc<RwLock<HashMap<String, EndpointInfo>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl K8sServiceDiscovery {
    /// Connect to the cluster and start the pod watcher.
    ///
    /// All engine pods are assumed to live in `namespace`, listen on
    /// `port`, and match `label_selector`.
    pub async fn new(
        namespace: String,
        port: u16,
        label_selector: Option<String>,
        client: reqwest::Client,
    ) -> Result<Self, DiscoveryError> {
        let kube_client =
            kube::Client::try_default()
                .await
                .map_err(|e| DiscoveryError::Kubernetes {
                    message: format!("failed to build Kubernetes client: {e}"),
                })?;
        let pods: Api<Pod> = Api::namespaced(kube_client, &namespace);

        let engines = Arc::new(RwLock::new(HashMap::new()));
        let cancel = CancellationToken::new();

        info!(
            namespace = %namespace,
            port,
            label_selector = label_selector.as_deref().unwrap_or(""),
            "Starting Kubernetes pod watcher"
        );
        let worker = tokio::spawn(watch_engines(
            pods,
            port,
            label_selector,
            client,
            Arc::clone(&engines),
            cancel.clone(),
        ));

        Ok(Self {
            engines,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }
}

#[async_trait]
impl ServiceDiscovery for K8sServiceDiscovery {
    fn get_endpoints(&self) -> Vec<EndpointInfo> {
        let engines = self.engines.read().expect("engine map lock poisoned");
        // Snapshot deduped by URL so a restarted pod never yields twins.
        let by_url: BTreeMap<String, EndpointInfo> = engines
            .values()
            .map(|endpoint| (endpoint.url.clone(), endpoint.clone()))
            .collect();
        by_url.into_values().collect()
    }

    fn get_health(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.worker
            .lock()
            .expect("watcher worker lock poisoned")
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .expect("watcher worker lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn watch_engines(
    pods: Api<Pod>,
    port: u16,
    label_selector: Option<String>,
    client: reqwest::Client,
    engines: Arc<RwLock<HashMap<String, EndpointInfo>>>,
    cancel: CancellationToken,
) {
    let api_key = std::env::var("VLLM_API_KEY").ok();
    let mut watch_config = WatcherConfig::default();
    if let Some(selector) = &label_selector {
        watch_config = watch_config.labels(selector);
    }

    loop {
        if cancel.is_cancelled() {
            debug!("Kubernetes watcher stopping");
            return;
        }

        let mut stream = watcher(pods.clone(), watch_config.clone()).boxed();
        // Endpoints accumulated during a (re)list, swapped in on InitDone so
        // a reconnect reconciles rather than clears the map.
        let mut pending: Option<HashMap<String, EndpointInfo>> = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Kubernetes watcher stopping");
                    return;
                }
                event = stream.try_next() => event,
            };

            match event {
                Ok(Some(Event::Init)) => {
                    pending = Some(HashMap::new());
                }
                Ok(Some(Event::InitApply(pod))) => {
                    if let Some((name, info)) =
                        resolve_pod(&pod, port, &client, &api_key, &engines).await
                    {
                        if let Some(pending) = pending.as_mut() {
                            pending.insert(name, info);
                        }
                    }
                }
                Ok(Some(Event::InitDone)) => {
                    if let Some(reconciled) = pending.take() {
                        *engines.write().expect("engine map lock poisoned") = reconciled;
                    }
                }
                Ok(Some(Event::Apply(pod))) => {
                    let name = pod.metadata.name.clone().unwrap_or_default();
                    match resolve_pod(&pod, port, &client, &api_key, &engines).await {
                        Some((name, info)) => {
                            info!(
                                pod = %name,
                                url = %info.url,
                                models = ?info.model_names,
                                "Discovered serving engine"
                            );
                            engines
                                .write()
                                .expect("engine map lock poisoned")
                                .insert(name, info);
                        }
                        // Pod exists but is not servable (not ready, no IP,
                        // or its model list is unreadable): drop it until
                        // the next successful observation.
                        None => {
                            let mut engines =
                                engines.write().expect("engine map lock poisoned");
                            if engines.remove(&name).is_some() {
                                info!(pod = %name, "Serving engine became unavailable");
                            }
                        }
                    }
                }
                Ok(Some(Event::Delete(pod))) => {
                    let name = pod.metadata.name.clone().unwrap_or_default();
                    let mut engines = engines.write().expect("engine map lock poisoned");
                    if engines.remove(&name).is_some() {
                        info!(pod = %name, "Serving engine deleted");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Kubernetes watch error: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                    }
                    break;
                }
            }
        }
    }
}

/// Turn a pod into an endpoint, if it is currently servable.
///
/// Requires a pod name, a pod IP and full container readiness, then reads
/// the model list from the engine itself. The `added_timestamp` of an
/// engine already known under the same URL is preserved.
async fn resolve_pod(
    pod: &Pod,
    port: u16,
    client: &reqwest::Client,
    api_key: &Option<String>,
    engines: &Arc<RwLock<HashMap<String, EndpointInfo>>>,
) -> Option<(String, EndpointInfo)> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref()?;
    let pod_ip = status.pod_ip.clone()?;

    if !pod_is_ready(pod) {
        return None;
    }

    let url = format!("http://{pod_ip}:{port}");
    let (model_names, model_info) = match fetch_model_list(client, &url, api_key).await {
        Ok(models) => models,
        Err(e) => {
            warn!(pod = %name, "{e}");
            return None;
        }
    };

    let model_label = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("model").cloned());

    let added_timestamp = {
        let engines = engines.read().expect("engine map lock poisoned");
        engines
            .get(&name)
            .filter(|existing| existing.url == url)
            .map(|existing| existing.added_timestamp)
            .unwrap_or_else(now_epoch_secs)
    };

    Some((
        name,
        EndpointInfo {
            url,
            model_names,
            model_label,
            added_timestamp,
            healthy: true,
            model_info: Some(model_info),
        },
    ))
}

/// All containers in the pod must report ready.
fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .is_some_and(|statuses| !statuses.is_empty() && statuses.iter().all(|s| s.ready))
}

async fn fetch_model_list(
    client: &reqwest::Client,
    url: &str,
    api_key: &Option<String>,
) -> Result<(BTreeSet<String>, Vec<ModelInfo>), DiscoveryError> {
    let list_error = |e: reqwest::Error| DiscoveryError::ModelListFailed {
        url: url.to_string(),
        message: e.to_string(),
    };

    let mut request = client
        .get(format!("{url}/v1/models"))
        .timeout(MODEL_LIST_TIMEOUT);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }
    let list: BackendModelList = request
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(list_error)?
        .json()
        .await
        .map_err(list_error)?;

    let model_names = list.data.iter().map(|entry| entry.id.clone()).collect();
    let model_info = list
        .data
        .into_iter()
        .map(|entry| ModelInfo {
            is_adapter: entry.parent.is_some(),
            id: entry.id,
            parent: entry.parent,
        })
        .collect();

    Ok((model_names, model_info))
}
