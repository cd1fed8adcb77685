//! Frame pipeline for the remote-operation console
//!
//! This module provides the real-time path between a network receive loop
//! and the render/record side, separating concerns between:
//! - Lifecycle: the connection state machine every link shares
//! - Hand-off: the single-slot latest-frame channel
//! - History: the bounded back-capture ring with on-demand persistence
//! - Observability: per-link health counters and the shared clock
//!
//! # Architecture
//!
//! The receive loop decodes, then publishes into [`FrameChannel`] and feeds
//! [`BackCapture`]; the consumer tick takes the latest frame, evicts stale
//! history, and polls [`SharedConnectionState`] for the status display. Those
//! three structures are the only cross-task mutable state in the core; each
//! guards its whole read-modify-write with one lock.

pub mod backcapture;
pub mod channel;
pub mod clock;
pub mod health;
pub mod state;
pub mod types;

pub use backcapture::{BackCapture, CapturePolicy};
pub use channel::FrameChannel;
pub use clock::PipelineClock;
pub use health::LinkHealth;
pub use state::{ConnectionPhase, ConnectionState, InvalidTransition, SharedConnectionState};
pub use types::{Timestamp, VideoFrame};
