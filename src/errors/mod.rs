//! Error handling module
//!
//! Re-exports the application error hierarchy for convenient importing.

pub mod types;

pub use types::{AppError, DiscoveryError, ScrapeError, WebError};

/// Convenience result alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;
