//! roverlink: device-link lifecycle and real-time frame pipeline
//!
//! The core of a remote-operation console: a uniform connection-state
//! machine shared by every network-facing client, a single-slot channel
//! handing the latest decoded frame from the receive task to the render
//! side, a bounded back-capture history that can be flushed to durable
//! storage on demand, and a lifecycle manager that builds and atomically
//! rebuilds the whole link graph.
//!
//! Wire protocols, codecs, and the GUI live outside this crate, behind the
//! collaborator traits in [`link::transport`] and [`storage`].

pub mod config;
pub mod link;
pub mod manager;
pub mod pipeline;
pub mod storage;

pub use config::AppConfig;
pub use link::{DeviceLink, LinkError, PtzVector, TelemetryMessage};
pub use manager::{LinkKind, LinkStatus, PipelineManager, TelemetrySubscription};
pub use pipeline::{
    BackCapture, CapturePolicy, ConnectionPhase, FrameChannel, PipelineClock,
    SharedConnectionState, VideoFrame,
};
pub use storage::{DirFrameStore, FrameStore, StorageError};
