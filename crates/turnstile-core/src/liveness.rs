//! Liveness tracking.
//!
//! A device is online while its last accepted reply is within the offline
//! timeout. Time is passed in by the caller; the tracker never reads a
//! clock.

use std::time::{Duration, Instant};

/// Reference offline window.
pub const DEFAULT_OFFLINE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks when the device last answered correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessTracker {
    last_valid_reply: Instant,
    timeout: Duration,
}

impl LivenessTracker {
    /// Start tracking at construction time.
    pub fn new(now: Instant, timeout: Duration) -> Self {
        Self { last_valid_reply: now, timeout }
    }

    /// Record an accepted reply.
    ///
    /// Only called after the reply passed sequence validation.
    pub fn record_valid_reply(&mut self, now: Instant) {
        self.last_valid_reply = now;
    }

    /// Online iff no more than the timeout has elapsed. The boundary is
    /// inclusive.
    pub fn is_online(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_valid_reply) <= self.timeout
    }

    /// Time of the last accepted reply.
    pub fn last_valid_reply(&self) -> Instant {
        self.last_valid_reply
    }

    /// Configured offline timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
