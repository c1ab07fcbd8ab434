//! Service discovery
//!
//! Maintains the authoritative view of which serving engines exist and
//! which models each serves. Two interchangeable backends implement the
//! same contract: a static list from configuration and a Kubernetes pod
//! watcher. Consumers only ever see point-in-time snapshots.

pub mod kubernetes;
pub mod static_discovery;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{DiscoveryConfig, DiscoveryMode};
use crate::errors::{AppError, AppResult};
use crate::models::EndpointInfo;

pub use kubernetes::K8sServiceDiscovery;
pub use static_discovery::StaticServiceDiscovery;

/// The endpoint-registry contract shared by all discovery backends.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// A consistent snapshot of the currently known healthy endpoints.
    fn get_endpoints(&self) -> Vec<EndpointInfo>;

    /// Alias model name -> actual model name, when configured.
    fn aliases(&self) -> Option<HashMap<String, String>> {
        None
    }

    /// Whether the background worker (if any) is alive.
    fn get_health(&self) -> bool;

    /// Stop any background worker and wait for it to exit.
    async fn close(&self);
}

/// Build the discovery backend selected by the configuration.
pub async fn create_service_discovery(
    config: &DiscoveryConfig,
    client: reqwest::Client,
) -> AppResult<Arc<dyn ServiceDiscovery>> {
    match config.mode {
        DiscoveryMode::Static => {
            let discovery = StaticServiceDiscovery::new(
                config.urls.clone(),
                config.models.clone(),
                config.aliases.clone(),
                config.model_labels.clone(),
                config.model_types.clone(),
                config.health_check,
                client,
            )?;
            Ok(Arc::new(discovery))
        }
        DiscoveryMode::K8s => {
            let namespace = config
                .namespace
                .clone()
                .ok_or_else(|| AppError::configuration("k8s discovery requires a namespace"))?;
            let port = config
                .port
                .ok_or_else(|| AppError::configuration("k8s discovery requires the engine port"))?;
            let discovery = K8sServiceDiscovery::new(
                namespace,
                port,
                config.label_selector.clone(),
                client,
            )
            .await?;
            Ok(Arc::new(discovery))
        }
    }
}
