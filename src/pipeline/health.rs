//! Health counters for a device link
//!
//! Tracks activity and error counters for the status display. All fields use
//! atomic operations for thread-safe access from the link task and readers.

use std::sync::atomic::{AtomicU64, Ordering};

use super::clock::PipelineClock;
use super::types::Timestamp;

/// Per-link health metrics
pub struct LinkHealth {
    /// Frames or messages successfully handled
    pub events: AtomicU64,

    /// Number of decode failures (frame dropped, link stays up)
    pub decode_failures: AtomicU64,

    /// Number of transport-level errors
    pub transport_errors: AtomicU64,

    /// Number of reconnect attempts driven by the lifecycle layer
    pub reconnects: AtomicU64,

    /// Pipeline stamp (µs) of the last successful activity
    pub last_activity_micros: AtomicU64,
}

impl LinkHealth {
    /// Create a new health record with zeroed counters
    pub fn new() -> Self {
        Self {
            events: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_activity_micros: AtomicU64::new(0),
        }
    }

    /// Record one successfully handled frame/message
    pub fn record_event(&self, clock: &PipelineClock) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.last_activity_micros
            .store(clock.now().micros.max(0) as u64, Ordering::Relaxed);
    }

    /// Record a decode failure
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport error
    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reconnect attempt
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamp of the last successful activity, if any
    pub fn last_activity(&self) -> Option<Timestamp> {
        match self.events.load(Ordering::Relaxed) {
            0 => None,
            _ => Some(Timestamp::from_micros(
                self.last_activity_micros.load(Ordering::Relaxed) as i64,
            )),
        }
    }

    /// One-line counter summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "events={} decode_failures={} transport_errors={} reconnects={}",
            self.events.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
            self.transport_errors.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
        )
    }
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let clock = PipelineClock::new();
        let health = LinkHealth::new();
        assert!(health.last_activity().is_none());

        health.record_event(&clock);
        health.record_event(&clock);
        health.record_decode_failure();

        assert_eq!(health.events.load(Ordering::Relaxed), 2);
        assert_eq!(health.decode_failures.load(Ordering::Relaxed), 1);
        assert!(health.last_activity().is_some());
        assert!(health.summary().contains("events=2"));
    }
}
