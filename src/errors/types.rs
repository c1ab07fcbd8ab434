//! Error type definitions for the LLM router
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the application.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Service discovery errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Engine stats scraping errors
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// Web layer errors
    #[error("Web error: {0}")]
    Web(#[from] WebError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Service discovery specific errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Static configuration arrays disagree in length
    #[error("Mismatched static configuration: {field} has {actual} entries, expected {expected}")]
    MismatchedLengths {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// An endpoint URL failed validation
    #[error("Invalid endpoint URL: {url}")]
    InvalidUrl { url: String },

    /// Kubernetes client construction or watch failures
    #[error("Kubernetes error: {message}")]
    Kubernetes { message: String },

    /// Fetching the model list from a backend failed
    #[error("Failed to list models from {url}: {message}")]
    ModelListFailed { url: String, message: String },
}

/// Engine stats scraping errors
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// HTTP-level scrape failure
    #[error("Failed to scrape {url}: {message}")]
    Fetch { url: String, message: String },

    /// Backend answered the scrape with a non-success status
    #[error("Scrape of {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
}

/// Web layer specific errors
#[derive(Error, Debug)]
pub enum WebError {
    /// Request body is not valid JSON or lacks required fields
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// No backend serves the requested model
    #[error("Model {model} not found.")]
    ModelNotFound { model: String },

    /// JSON parsing errors
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
