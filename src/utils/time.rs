//! Wall-clock helpers
//!
//! The stats subsystem works with plain `f64` seconds since the Unix epoch
//! so that tests can feed literal timestamps without mocking a clock.

use chrono::Utc;

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Current wall-clock time as whole seconds since the Unix epoch.
pub fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}
