//! Time-bounded sample retention
//!
//! `SlidingWindow` is the primitive behind the QPS, TTFT and latency
//! aggregates: an ordered run of `(timestamp, value)` pairs where every
//! access first evicts entries older than the window size.

use std::collections::VecDeque;

/// A sliding window of timestamped samples.
///
/// Timestamps are fractional seconds and must be fed in non-decreasing
/// order; the callers use the wall clock, which satisfies this.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_secs: f64,
    entries: VecDeque<(f64, f64)>,
}

impl SlidingWindow {
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            entries: VecDeque::new(),
        }
    }

    /// Append a sample and evict everything older than the window.
    pub fn update(&mut self, timestamp: f64, value: f64) {
        self.entries.push_back((timestamp, value));
        self.evict(timestamp);
    }

    /// Evict stale entries without recording a sample.
    pub fn touch(&mut self, timestamp: f64) {
        self.evict(timestamp);
    }

    /// Mean of the retained values, or -1.0 when the window is empty.
    pub fn average(&self) -> f64 {
        if self.entries.is_empty() {
            return -1.0;
        }
        self.sum() / self.entries.len() as f64
    }

    /// Sum of the retained values; 0.0 when the window is empty.
    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self, now: f64) {
        while let Some(&(ts, _)) = self.entries.front() {
            if ts < now - self.window_secs {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}
