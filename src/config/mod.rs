use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::AppError;
use crate::utils::validate_url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub web: WebConfig,
    pub discovery: DiscoveryConfig,
    pub routing: RoutingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// Which service-discovery backend feeds the endpoint registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    Static,
    K8s,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub mode: DiscoveryMode,

    // --- static mode ---
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
    /// Alias model name -> actual model name
    #[serde(default)]
    pub aliases: Option<HashMap<String, String>>,
    #[serde(default)]
    pub model_labels: Option<Vec<String>>,
    #[serde(default)]
    pub model_types: Option<Vec<crate::models::ModelType>>,
    /// Probe static backends every 60s and hide unhealthy ones
    #[serde(default)]
    pub health_check: bool,

    // --- k8s mode ---
    #[serde(default)]
    pub namespace: Option<String>,
    /// Port the engine pods listen on
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub label_selector: Option<String>,
}

/// Which routing policy picks a backend per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingPolicyKind {
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "session")]
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub policy: RoutingPolicyKind,
    /// Header name carrying the session id (session policy only)
    #[serde(default)]
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// How often to scrape each engine's /metrics
    #[serde(with = "humantime_serde")]
    pub engine_stats_interval: Duration,
    /// Sliding window for QPS/TTFT/latency aggregates
    #[serde(with = "humantime_serde")]
    pub request_stats_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8001,
            },
            discovery: DiscoveryConfig {
                mode: DiscoveryMode::Static,
                urls: vec![],
                models: vec![],
                aliases: None,
                model_labels: None,
                model_types: None,
                health_check: false,
                namespace: None,
                port: None,
                label_selector: None,
            },
            routing: RoutingConfig {
                policy: RoutingPolicyKind::RoundRobin,
                session_key: None,
            },
            monitoring: MonitoringConfig {
                engine_stats_interval: Duration::from_secs(30),
                request_stats_window: Duration::from_secs(60),
            },
        }
    }
}

impl Config {
    pub fn load(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            tracing::warn!(
                "Config file '{}' not found, using default configuration values",
                config_file
            );
            let config: Config = Figment::new()
                .merge(figment::providers::Serialized::defaults(Config::default()))
                .merge(Env::prefixed("LLM_ROUTER_").split("__"))
                .extract()?;
            return Ok(config);
        }

        let config: Config = Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed("LLM_ROUTER_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Reject configurations the router cannot start with.
    ///
    /// Called once at startup; any error here aborts the process with a
    /// non-zero exit code.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.discovery.mode {
            DiscoveryMode::Static => {
                if self.discovery.urls.is_empty() {
                    return Err(AppError::configuration(
                        "static discovery requires at least one backend URL",
                    ));
                }
                if self.discovery.urls.len() != self.discovery.models.len() {
                    return Err(AppError::configuration(format!(
                        "static discovery: {} URLs but {} models",
                        self.discovery.urls.len(),
                        self.discovery.models.len()
                    )));
                }
                if let Some(labels) = &self.discovery.model_labels
                    && labels.len() != self.discovery.urls.len()
                {
                    return Err(AppError::configuration(format!(
                        "static discovery: {} URLs but {} model labels",
                        self.discovery.urls.len(),
                        labels.len()
                    )));
                }
                if let Some(types) = &self.discovery.model_types
                    && types.len() != self.discovery.urls.len()
                {
                    return Err(AppError::configuration(format!(
                        "static discovery: {} URLs but {} model types",
                        self.discovery.urls.len(),
                        types.len()
                    )));
                }
                for url in &self.discovery.urls {
                    if !validate_url(url) {
                        return Err(AppError::configuration(format!(
                            "invalid backend URL: {url}"
                        )));
                    }
                }
            }
            DiscoveryMode::K8s => {
                if self.discovery.namespace.is_none() {
                    return Err(AppError::configuration(
                        "k8s discovery requires a namespace",
                    ));
                }
                if self.discovery.port.is_none() {
                    return Err(AppError::configuration(
                        "k8s discovery requires the engine port",
                    ));
                }
            }
        }

        if self.routing.policy == RoutingPolicyKind::Session
            && self
                .routing
                .session_key
                .as_deref()
                .is_none_or(|k| k.is_empty())
        {
            return Err(AppError::configuration(
                "session routing requires a session_key header name",
            ));
        }

        if self.monitoring.engine_stats_interval.is_zero() {
            return Err(AppError::configuration(
                "engine_stats_interval must be positive",
            ));
        }
        if self.monitoring.request_stats_window.is_zero() {
            return Err(AppError::configuration(
                "request_stats_window must be positive",
            ));
        }

        Ok(())
    }
}
