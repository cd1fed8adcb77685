//! Transport and decoder collaborator traits
//!
//! The core never speaks a wire protocol and never decodes video. It calls
//! `open`/`read`/`close` on these traits and interprets the outcomes as
//! connection-state transitions; the real RTSP/ONVIF/bus clients live
//! outside the crate (the bundled [`sim`](super::sim) backends stand in for
//! them in the binary and in tests).

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{CameraConfig, TelemetryConfig};

/// One encoded video packet as read off the wire
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded payload bytes
    pub payload: Bytes,

    /// Whether the packet starts an independently decodable frame
    pub keyframe: bool,
}

/// Decoded image handed back by the decoder collaborator
///
/// The link stamps it into a [`VideoFrame`](crate::pipeline::VideoFrame)
/// with the pipeline clock; decoders know nothing about pipeline time.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Decoded pixel data
    pub pixels: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

/// Requested pan/tilt/zoom motion, normalized to `-1.0..=1.0` per axis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PtzVector {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
}

impl PtzVector {
    /// Whether this vector requests no motion
    pub fn is_zero(&self) -> bool {
        self.pan == 0.0 && self.tilt == 0.0 && self.zoom == 0.0
    }
}

impl std::fmt::Display for PtzVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(pan {:+.2}, tilt {:+.2}, zoom {:+.2})",
            self.pan, self.tilt, self.zoom
        )
    }
}

/// One message read off the telemetry bus
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    /// Bus topic the message arrived on
    pub topic: String,

    /// Decoded message payload
    pub payload: serde_json::Value,
}

/// Video transport collaborator (e.g. an RTSP session)
#[async_trait]
pub trait VideoSource: Send {
    /// Establish the session
    async fn open(&mut self) -> anyhow::Result<()>;

    /// Read the next encoded packet; blocks until one arrives or the
    /// session breaks
    async fn read_packet(&mut self) -> anyhow::Result<EncodedPacket>;

    /// Tear the session down; must be safe to call after a failed read
    async fn close(&mut self);
}

/// Decoder collaborator turning encoded packets into raw images
pub trait FrameDecoder: Send {
    /// Decode one packet; an `Err` means this packet is malformed and must
    /// be dropped, not that the stream is broken
    fn decode(&mut self, packet: &EncodedPacket) -> anyhow::Result<DecodedImage>;
}

/// PTZ control transport collaborator (e.g. an ONVIF endpoint)
#[async_trait]
pub trait PtzTransport: Send {
    /// Establish the control session
    async fn open(&mut self) -> anyhow::Result<()>;

    /// Send a continuous-move request
    async fn send_move(&mut self, vector: PtzVector) -> anyhow::Result<()>;

    /// Tear the session down
    async fn close(&mut self);
}

/// Telemetry bus transport collaborator (e.g. an MQTT session)
#[async_trait]
pub trait TelemetryTransport: Send {
    /// Establish the bus session and subscribe to the configured topics
    async fn open(&mut self) -> anyhow::Result<()>;

    /// Await the next message; blocks until one arrives or the session
    /// breaks
    async fn next_message(&mut self) -> anyhow::Result<TelemetryMessage>;

    /// Tear the session down
    async fn close(&mut self);
}

/// Creates fresh transports for every pipeline build
///
/// The lifecycle manager goes through this factory on each build/rebuild so
/// a new generation never inherits half-dead sessions from the previous one.
pub trait TransportFactory: Send + Sync {
    /// Video transport for one configured camera
    fn video_source(&self, camera: &CameraConfig) -> Box<dyn VideoSource>;

    /// Decoder matching the camera's stream
    fn frame_decoder(&self, camera: &CameraConfig) -> Box<dyn FrameDecoder>;

    /// PTZ control transport for one configured camera
    fn ptz_transport(&self, camera: &CameraConfig) -> Box<dyn PtzTransport>;

    /// Telemetry bus transport
    fn telemetry_transport(&self, telemetry: &TelemetryConfig) -> Box<dyn TelemetryTransport>;
}
