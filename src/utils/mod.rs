//! Shared utilities

pub mod body;
pub mod system;
pub mod time;
pub mod url;

pub use body::replace_model_in_request_body;
pub use system::raise_fd_limit;
pub use time::now_secs;
pub use url::validate_url;
