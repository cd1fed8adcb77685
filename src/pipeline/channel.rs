//! Single-slot frame channel between the receive task and the consumer
//!
//! This is the hand-off point for decoded video frames: the link's receive
//! loop publishes, the render side takes. Last writer wins; there is no
//! queueing and neither side ever blocks the other beyond one slot swap.
//!
//! # Design
//!
//! One mutex guards a `slot: Option<VideoFrame>` plus a dirty flag:
//! - `publish` replaces the slot and marks it dirty; a frame the consumer
//!   never asked for is simply discarded.
//! - `take_if_new` moves the frame out only when dirty, so calling it twice
//!   without an intervening publish yields the frame once and then nothing.
//!
//! The critical section is a buffer swap and nothing else (no decoding, no
//! I/O), so the producer cannot be starved by a slow consumer or vice versa.
//! The consumer always observes either no frame or a complete frame; partial
//! writes are never visible.

use std::sync::Mutex;
use std::time::Duration;

use super::clock::PipelineClock;
use super::types::{Timestamp, VideoFrame};

struct ChannelSlot {
    frame: Option<VideoFrame>,
    dirty: bool,
    /// Stamp of the last frame handed to the consumer
    last_taken: Option<Timestamp>,
    /// Stamp of the last published frame; survives the take so the age
    /// readout does not blink between frames
    last_published: Option<Timestamp>,
}

/// Single-slot, dirty-flagged latest-frame buffer
pub struct FrameChannel {
    slot: Mutex<ChannelSlot>,
    clock: PipelineClock,
}

impl FrameChannel {
    /// Create an empty channel on the given clock
    pub fn new(clock: PipelineClock) -> Self {
        Self {
            slot: Mutex::new(ChannelSlot {
                frame: None,
                dirty: false,
                last_taken: None,
                last_published: None,
            }),
            clock,
        }
    }

    /// Publish a frame, replacing whatever the slot held
    ///
    /// Never blocks on the consumer; the previous frame, if any, is dropped.
    pub fn publish(&self, frame: VideoFrame) {
        let mut slot = self.lock();
        slot.last_published = Some(frame.captured_at);
        slot.frame = Some(frame);
        slot.dirty = true;
    }

    /// Take the latest frame if one was published since the last take
    ///
    /// Frames handed out are monotonically non-decreasing in `captured_at`;
    /// a frame stamped earlier than one already taken is dropped here so the
    /// consumer never observes time moving backwards.
    pub fn take_if_new(&self) -> Option<VideoFrame> {
        let mut slot = self.lock();
        if !slot.dirty {
            return None;
        }
        slot.dirty = false;

        let frame = slot.frame.take()?;
        if let Some(last) = slot.last_taken
            && frame.captured_at < last
        {
            return None;
        }
        slot.last_taken = Some(frame.captured_at);
        Some(frame)
    }

    /// Clone of the current slot content without consuming the dirty flag
    ///
    /// Used by the still-image capture action; a subsequent `take_if_new`
    /// still sees the frame.
    pub fn snapshot_latest(&self) -> Option<VideoFrame> {
        self.lock().frame.clone()
    }

    /// Age of the most recently published frame, derived from `captured_at`
    pub fn latest_age(&self) -> Option<Duration> {
        let captured_at = self.lock().last_published?;
        Some(self.clock.age_of(captured_at))
    }

    /// Whether an unconsumed frame is waiting
    pub fn has_new_frame(&self) -> bool {
        self.lock().dirty
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChannelSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FrameChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock();
        f.debug_struct("FrameChannel")
            .field("occupied", &slot.frame.is_some())
            .field("dirty", &slot.dirty)
            .finish()
    }
}
