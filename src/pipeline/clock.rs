//! Pipeline clock: the shared time base for frame stamps and age readouts

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::Timestamp;

/// Shared time base for the frame pipeline
///
/// All frame timestamps are relative to the clock epoch, so a frame's age is
/// always derived from its `captured_at` stamp rather than from when it
/// happened to cross a channel.
///
/// # Thread Safety
///
/// The clock is cheap to clone; clones share the same epoch.
#[derive(Clone)]
pub struct PipelineClock {
    /// Epoch instant the pipeline was built at
    epoch: Arc<Instant>,
}

impl PipelineClock {
    /// Create a new clock starting now
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(Instant::now()),
        }
    }

    /// Get the epoch instant
    pub fn epoch(&self) -> Instant {
        *self.epoch
    }

    /// Get the current pipeline timestamp
    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.epoch.elapsed())
    }

    /// Age of a timestamp relative to now
    ///
    /// Saturates to zero for stamps taken between `now()` calls on another
    /// thread.
    pub fn age_of(&self, ts: Timestamp) -> Duration {
        let now = self.now();
        if now.micros <= ts.micros {
            Duration::ZERO
        } else {
            Duration::from_micros((now.micros - ts.micros) as u64)
        }
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineClock")
            .field("elapsed", &self.epoch.elapsed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clock_basic() {
        let clock = PipelineClock::new();

        // Small delay to ensure some time has passed
        thread::sleep(Duration::from_millis(10));

        let ts = clock.now();
        assert!(ts.micros > 0);
    }

    #[test]
    fn test_clones_share_epoch() {
        let clock = PipelineClock::new();
        let other = clock.clone();

        let a = clock.now();
        let b = other.now();
        assert!(a.diff(b) < Duration::from_millis(5));
    }

    #[test]
    fn test_age_of() {
        let clock = PipelineClock::new();
        let ts = clock.now();

        thread::sleep(Duration::from_millis(10));
        let age = clock.age_of(ts);
        assert!(age >= Duration::from_millis(10));

        // Future stamps saturate to zero
        let future = Timestamp::from_micros(ts.micros + 10_000_000);
        assert_eq!(clock.age_of(future), Duration::ZERO);
    }
}
