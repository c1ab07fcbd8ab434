//! Endpoint URL validation

use url::Url;

/// Validate that a configured backend URL is an absolute http(s) URL.
pub fn validate_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.has_host(),
        Err(_) => false,
    }
}
