//! Core types for the frame pipeline

use std::time::{Duration, Instant};

/// Timestamp representation for captured frames
///
/// Microseconds relative to the pipeline epoch (see
/// [`PipelineClock`](super::clock::PipelineClock)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Microseconds since pipeline epoch
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from a duration since the pipeline epoch
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Create a timestamp from an instant relative to an epoch
    pub fn from_instant(instant: Instant, epoch: Instant) -> Self {
        let duration = instant.saturating_duration_since(epoch);
        Self::from_duration(duration)
    }

    /// Convert to a duration since the pipeline epoch
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }

    /// Absolute difference between two timestamps
    pub fn diff(&self, other: Timestamp) -> Duration {
        let diff_micros = (self.micros - other.micros).abs();
        Duration::from_micros(diff_micros as u64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// One decoded video frame
///
/// The pixel buffer is exclusively owned by whichever buffer currently holds
/// the frame (the [`FrameChannel`](super::channel::FrameChannel) slot or a
/// [`BackCapture`](super::backcapture::BackCapture) entry); it is cloned,
/// never shared, when handed to a second buffer.
#[derive(Clone)]
pub struct VideoFrame {
    /// Decoded pixel data, owned
    pub pixels: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// When this frame was captured (decode time, pipeline clock)
    pub captured_at: Timestamp,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: Timestamp) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
        }
    }

    /// Size of the pixel buffer in bytes
    pub fn size(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .field("size", &self.size())
            .finish()
    }
}
