//! Device links: the per-protocol network clients
//!
//! A device link owns one connection state machine and a background receive
//! activity. The video link feeds the frame pipeline; the PTZ and telemetry
//! links exchange control and bus messages through the same lifecycle
//! contract. Links never retry on their own; when `run` returns, the
//! lifecycle layer decides what happens next.

use async_trait::async_trait;

use crate::pipeline::SharedConnectionState;

pub mod error;
pub mod ptz;
pub mod sim;
pub mod telemetry;
pub mod transport;
pub mod video;

pub use error::LinkError;
pub use ptz::PtzLink;
pub use telemetry::TelemetryLink;
pub use transport::{
    DecodedImage, EncodedPacket, FrameDecoder, PtzTransport, PtzVector, TelemetryMessage,
    TelemetryTransport, TransportFactory, VideoSource,
};
pub use video::VideoLink;

/// Trait for device links driven by a background task
#[async_trait]
pub trait DeviceLink: Send {
    /// Name of this link for logging and status display
    fn name(&self) -> &str;

    /// The link's shared connection state
    fn state(&self) -> &SharedConnectionState;

    /// Drive one connection attempt to completion
    ///
    /// Connects, then services the link until the cancellation signal fires
    /// (orderly close, `Ok`) or the transport fails (`Faulted`, `Err`).
    /// Re-invoking `run` after an `Err` is a reconnect.
    async fn run(&mut self) -> Result<(), LinkError>;
}
