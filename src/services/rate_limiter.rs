//! Rate limiter for attendance code scans
//!
//! Slows down clients guessing or replaying codes by counting failed
//! verifications per client address (default: 10 failures per minute).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::services::clock::{Clock, SystemClock};

/// Default number of failed scans allowed inside the window
const DEFAULT_MAX_FAILURES: usize = 10;

/// Default window length in seconds
const DEFAULT_WINDOW_SECONDS: i64 = 60;

/// Failed-scan rate limiter
pub struct ScanRateLimiter {
    /// Failed scans by client address
    failures: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
    max_failures: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl ScanRateLimiter {
    /// Create a limiter with the default budget
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_FAILURES, Duration::seconds(DEFAULT_WINDOW_SECONDS))
    }

    pub fn with_limits(max_failures: usize, window: Duration) -> Self {
        Self {
            failures: Arc::new(RwLock::new(HashMap::new())),
            max_failures,
            window,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Oldest failure time still inside the window
    ///
    /// `None` when the window reaches past the earliest representable time,
    /// in which case every recorded failure counts.
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.clock.now().checked_sub_signed(self.window)
    }

    /// Seconds a limited client should wait
    pub fn retry_after_seconds(&self) -> i64 {
        self.window.num_seconds()
    }

    /// Check if a client has used up its failure budget
    pub async fn is_limited(&self, client: &str) -> bool {
        let mut failures = self.failures.write().await;
        let cutoff = self.cutoff();

        let client_failures = failures.entry(client.to_string()).or_default();
        if let Some(cutoff) = cutoff {
            client_failures.retain(|time| *time > cutoff);
        }

        client_failures.len() >= self.max_failures
    }

    /// Record a failed verification for a client
    pub async fn record_failure(&self, client: &str) {
        let mut failures = self.failures.write().await;
        failures
            .entry(client.to_string())
            .or_default()
            .push(self.clock.now());
    }

    /// Clean up old entries (should be called periodically)
    pub async fn cleanup(&self) {
        let Some(cutoff) = self.cutoff() else {
            return;
        };
        let mut failures = self.failures.write().await;
        failures.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }

    /// Number of clients currently tracked
    pub async fn tracked_clients(&self) -> usize {
        self.failures.read().await.len()
    }
}

impl Default for ScanRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
