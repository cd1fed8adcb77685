//! Back-capture: bounded history of recent frames
//!
//! The video link feeds every decoded frame in here so the operator can save
//! the last few seconds retroactively. The buffer is bounded by a capacity
//! policy and evicted from the consumer tick rather than on every feed, which
//! keeps the producer's critical section to a single append.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};

use super::clock::PipelineClock;
use super::types::VideoFrame;
use crate::storage::{FrameStore, StorageError};

/// Capacity policy for the back-capture history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
    /// Keep at most this many frames
    Frames(usize),

    /// Keep frames younger than this window
    Window(Duration),
}

impl std::fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapturePolicy::Frames(n) => write!(f, "{} frames", n),
            CapturePolicy::Window(w) => write!(f, "{:.1}s window", w.as_secs_f64()),
        }
    }
}

/// Bounded, time-ordered ring of recent frames
///
/// Entries are oldest-first and non-decreasing in `captured_at`. The buffer
/// is created at pipeline build time with its configured policy; it is only
/// resized or discarded by rebuilding the pipeline, never silently.
pub struct BackCapture {
    entries: Mutex<VecDeque<VideoFrame>>,
    policy: CapturePolicy,
    clock: PipelineClock,
}

impl BackCapture {
    /// Create an empty buffer with the given capacity policy
    pub fn new(policy: CapturePolicy, clock: PipelineClock) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            policy,
            clock,
        }
    }

    /// Capacity policy this buffer was built with
    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    /// Append a frame to the tail
    ///
    /// A frame stamped earlier than the current tail would break the time
    /// ordering of the history and is dropped instead.
    pub fn feed(&self, frame: VideoFrame) {
        let mut entries = self.lock();
        if let Some(tail) = entries.back()
            && frame.captured_at < tail.captured_at
        {
            warn!(
                "BackCapture: dropping out-of-order frame ({} < {})",
                frame.captured_at, tail.captured_at
            );
            return;
        }
        entries.push_back(frame);
    }

    /// Evict entries that fall outside the capacity policy, from the head
    ///
    /// Called once per consumer tick, not on every feed, so the eviction
    /// cost stays off the receive path.
    pub fn evict_stale(&self) {
        let mut entries = self.lock();
        let before = entries.len();
        match self.policy {
            CapturePolicy::Frames(limit) => {
                while entries.len() > limit {
                    entries.pop_front();
                }
            }
            CapturePolicy::Window(window) => {
                while let Some(head) = entries.front() {
                    if self.clock.age_of(head.captured_at) > window {
                        entries.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("BackCapture: evicted {} stale frames", evicted);
        }
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Time span covered by the buffered history
    pub fn span(&self) -> Option<Duration> {
        let entries = self.lock();
        let oldest = entries.front()?.captured_at;
        let newest = entries.back()?.captured_at;
        Some(newest.diff(oldest))
    }

    /// Ordered copy of the current entries, oldest first
    pub fn snapshot(&self) -> Vec<VideoFrame> {
        self.lock().iter().cloned().collect()
    }

    /// Persist the current history through the storage collaborator
    ///
    /// The buffer lock is held only for the eviction pass and the snapshot
    /// copy; the storage write happens outside it, so concurrent `feed`
    /// calls neither stall nor corrupt the export. On failure the buffer is
    /// untouched and the error goes back to the caller; there is no retry.
    pub fn flush_to_storage(
        &self,
        store: &dyn FrameStore,
        label: &str,
    ) -> Result<PathBuf, StorageError> {
        self.evict_stale();
        let frames = self.snapshot();
        store.store(label, &frames)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<VideoFrame>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for BackCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackCapture")
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;
    use std::sync::Mutex as StdMutex;

    fn frame(tag: u8, micros: i64) -> VideoFrame {
        VideoFrame::new(vec![tag; 8], 2, 1, Timestamp::from_micros(micros))
    }

    /// In-memory store recording what was persisted
    struct MemoryStore {
        captures: StdMutex<Vec<(String, Vec<VideoFrame>)>>,
        fail: bool,
    }

    impl MemoryStore {
        fn new(fail: bool) -> Self {
            Self {
                captures: StdMutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl FrameStore for MemoryStore {
        fn store(&self, label: &str, frames: &[VideoFrame]) -> Result<PathBuf, StorageError> {
            if self.fail {
                return Err(StorageError::Io(std::io::Error::other("disk gone")));
            }
            if frames.is_empty() {
                return Err(StorageError::EmptyCapture);
            }
            self.captures
                .lock()
                .unwrap()
                .push((label.to_string(), frames.to_vec()));
            Ok(PathBuf::from(label))
        }
    }

    #[test]
    fn test_count_capacity_evicts_oldest() {
        let buffer = BackCapture::new(CapturePolicy::Frames(3), PipelineClock::new());

        // Frames at t=0,1,2,3 with capacity 3 → keeps t=1,2,3
        for (tag, t) in [(0u8, 0i64), (1, 1), (2, 2), (3, 3)] {
            buffer.feed(frame(tag, t));
        }
        buffer.evict_stale();

        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 3);
        let stamps: Vec<i64> = snap.iter().map(|f| f.captured_at.micros).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_window_capacity_evicts_by_age() {
        let clock = PipelineClock::new();
        let buffer = BackCapture::new(CapturePolicy::Window(Duration::from_millis(50)), clock.clone());

        buffer.feed(frame(1, 0)); // ancient, relative to the clock epoch
        std::thread::sleep(Duration::from_millis(60));
        buffer.feed(VideoFrame::new(vec![2; 8], 2, 1, clock.now()));

        buffer.evict_stale();
        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].pixels[0], 2);
    }

    #[test]
    fn test_entries_stay_time_ordered() {
        let buffer = BackCapture::new(CapturePolicy::Frames(10), PipelineClock::new());

        buffer.feed(frame(1, 100));
        buffer.feed(frame(2, 200));
        // Out-of-order feed is dropped, not inserted
        buffer.feed(frame(3, 50));

        let snap = buffer.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.windows(2).all(|w| w[0].captured_at <= w[1].captured_at));
    }

    #[test]
    fn test_flush_snapshot_isolation() {
        let buffer = BackCapture::new(CapturePolicy::Frames(10), PipelineClock::new());
        let store = MemoryStore::new(false);

        buffer.feed(frame(1, 1));
        buffer.feed(frame(2, 2));
        buffer.flush_to_storage(&store, "cap").unwrap();

        // Feeding after the flush must not alter the persisted snapshot
        buffer.feed(frame(3, 3));

        let captures = store.captures.lock().unwrap();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].1.len(), 2);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_flush_failure_leaves_buffer_unchanged() {
        let buffer = BackCapture::new(CapturePolicy::Frames(10), PipelineClock::new());
        let store = MemoryStore::new(true);

        buffer.feed(frame(1, 1));
        buffer.feed(frame(2, 2));

        assert!(buffer.flush_to_storage(&store, "cap").is_err());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_flush_empty_is_an_error() {
        let buffer = BackCapture::new(CapturePolicy::Frames(4), PipelineClock::new());
        let store = MemoryStore::new(false);
        assert!(matches!(
            buffer.flush_to_storage(&store, "cap"),
            Err(StorageError::EmptyCapture)
        ));
    }

    #[test]
    fn test_span() {
        let buffer = BackCapture::new(CapturePolicy::Frames(10), PipelineClock::new());
        assert!(buffer.span().is_none());

        buffer.feed(frame(1, 1_000));
        buffer.feed(frame(2, 41_000));
        assert_eq!(buffer.span().unwrap(), Duration::from_micros(40_000));
    }
}
