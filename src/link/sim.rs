//! Synthetic transport backends
//!
//! Deterministic in-process stand-ins for the real RTSP/ONVIF/bus clients,
//! used by the console binary and by the tests. The pattern source emits a
//! moving gradient at a fixed cadence; failure injection covers refused
//! connects, mid-stream drops and corrupt packets.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;

use super::transport::{
    DecodedImage, EncodedPacket, FrameDecoder, PtzTransport, PtzVector, TelemetryMessage,
    TelemetryTransport, TransportFactory, VideoSource,
};
use crate::config::{CameraConfig, TelemetryConfig};

// ── Video ───────────────────────────────────────────────────────

/// Test-pattern video source
///
/// Packets carry the frame dimensions followed by raw pixels, which is all
/// the [`PatternDecoder`] needs to reconstruct an image.
pub struct PatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    frame_index: u64,
    refuse_connect: bool,
    fail_after: Option<u64>,
    corrupt_every: Option<u64>,
}

impl PatternSource {
    /// Create a source producing `width`×`height` frames every `interval`
    pub fn new(width: u32, height: u32, interval: Duration) -> Self {
        Self {
            width,
            height,
            interval,
            frame_index: 0,
            refuse_connect: false,
            fail_after: None,
            corrupt_every: None,
        }
    }

    /// Make `open` fail as if the endpoint were unreachable
    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Drop the stream after `n` packets
    pub fn fail_after(mut self, n: u64) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Truncate every `n`-th packet so it fails to decode
    pub fn corrupt_every(mut self, n: u64) -> Self {
        self.corrupt_every = Some(n);
        self
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut payload = Vec::with_capacity(8 + w * h * 4);
        payload.extend_from_slice(&self.width.to_le_bytes());
        payload.extend_from_slice(&self.height.to_le_bytes());
        for y in 0..h {
            for x in 0..w {
                let shade = (x + y + self.frame_index as usize) as u8;
                payload.extend_from_slice(&[shade, shade.wrapping_add(64), shade.wrapping_add(128), 0xff]);
            }
        }
        payload
    }
}

#[async_trait]
impl VideoSource for PatternSource {
    async fn open(&mut self) -> anyhow::Result<()> {
        if self.refuse_connect {
            bail!("connection refused (simulated)");
        }
        // A fresh session restarts the pattern and the failure countdown
        self.frame_index = 0;
        Ok(())
    }

    async fn read_packet(&mut self) -> anyhow::Result<EncodedPacket> {
        if let Some(limit) = self.fail_after
            && self.frame_index >= limit
        {
            bail!("stream dropped (simulated)");
        }

        tokio::time::sleep(self.interval).await;

        let mut payload = self.render();
        if let Some(every) = self.corrupt_every
            && self.frame_index % every == every - 1
        {
            payload.truncate(payload.len() / 2);
        }

        let packet = EncodedPacket {
            payload: Bytes::from(payload),
            keyframe: self.frame_index % 30 == 0,
        };
        self.frame_index += 1;
        Ok(packet)
    }

    async fn close(&mut self) {}
}

/// Decoder for [`PatternSource`] packets
pub struct PatternDecoder;

impl PatternDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PatternDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for PatternDecoder {
    fn decode(&mut self, packet: &EncodedPacket) -> anyhow::Result<DecodedImage> {
        let data = &packet.payload;
        if data.len() < 8 {
            bail!("packet too short for header");
        }
        let width = u32::from_le_bytes(data[..4].try_into()?);
        let height = u32::from_le_bytes(data[4..8].try_into()?);
        let expected = (width as usize) * (height as usize) * 4;
        let pixels = &data[8..];
        if pixels.len() != expected {
            bail!("payload is {} bytes, expected {}", pixels.len(), expected);
        }
        Ok(DecodedImage {
            pixels: pixels.to_vec(),
            width,
            height,
        })
    }
}

// ── PTZ ─────────────────────────────────────────────────────────

/// PTZ endpoint that records every vector it is asked to move by
pub struct RecordingPtzEndpoint {
    sent: Arc<Mutex<Vec<PtzVector>>>,
    fail_sends: bool,
}

impl RecordingPtzEndpoint {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_sends: false,
        }
    }

    /// Make every `send_move` fail as a broken control session
    pub fn fail_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Handle to the recorded vectors; keep a clone before boxing
    pub fn sent(&self) -> Arc<Mutex<Vec<PtzVector>>> {
        Arc::clone(&self.sent)
    }
}

impl Default for RecordingPtzEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PtzTransport for RecordingPtzEndpoint {
    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_move(&mut self, vector: PtzVector) -> anyhow::Result<()> {
        if self.fail_sends {
            return Err(anyhow!("control session lost (simulated)"));
        }
        self.sent.lock().unwrap().push(vector);
        Ok(())
    }

    async fn close(&mut self) {}
}

// ── Telemetry ───────────────────────────────────────────────────

/// Telemetry feed replaying a fixed message script
pub struct ScriptedTelemetryFeed {
    script: Vec<TelemetryMessage>,
    pending: VecDeque<TelemetryMessage>,
    interval: Duration,
    repeating: bool,
    fail_when_exhausted: bool,
}

impl ScriptedTelemetryFeed {
    /// Create a feed delivering `script` at `interval` pacing
    pub fn new(script: Vec<TelemetryMessage>, interval: Duration) -> Self {
        Self {
            pending: script.clone().into(),
            script,
            interval,
            repeating: false,
            fail_when_exhausted: false,
        }
    }

    /// Restart the script from the top when it runs out
    pub fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }

    /// Report a broken bus session once the script runs out
    pub fn fail_when_exhausted(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }
}

#[async_trait]
impl TelemetryTransport for ScriptedTelemetryFeed {
    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn next_message(&mut self) -> anyhow::Result<TelemetryMessage> {
        if self.pending.is_empty() && self.repeating && !self.script.is_empty() {
            self.pending = self.script.clone().into();
        }
        let Some(message) = self.pending.pop_front() else {
            if self.fail_when_exhausted {
                bail!("bus connection lost (simulated)");
            }
            // Quiet bus: block until cancelled from outside
            std::future::pending::<()>().await;
            unreachable!();
        };

        tokio::time::sleep(self.interval).await;
        Ok(message)
    }

    async fn close(&mut self) {}
}

// ── Factory ─────────────────────────────────────────────────────

/// Transport factory wiring every link to the synthetic backends
pub struct SimTransportFactory {
    /// Pattern stream resolution
    pub resolution: (u32, u32),

    /// Pattern stream frame pacing
    pub frame_interval: Duration,

    /// Scripted telemetry pacing
    pub telemetry_interval: Duration,
}

impl Default for SimTransportFactory {
    fn default() -> Self {
        Self {
            resolution: (160, 90),
            frame_interval: Duration::from_millis(33),
            telemetry_interval: Duration::from_millis(200),
        }
    }
}

impl TransportFactory for SimTransportFactory {
    fn video_source(&self, _camera: &CameraConfig) -> Box<dyn VideoSource> {
        let (w, h) = self.resolution;
        Box::new(PatternSource::new(w, h, self.frame_interval))
    }

    fn frame_decoder(&self, _camera: &CameraConfig) -> Box<dyn FrameDecoder> {
        Box::new(PatternDecoder::new())
    }

    fn ptz_transport(&self, _camera: &CameraConfig) -> Box<dyn PtzTransport> {
        Box::new(RecordingPtzEndpoint::new())
    }

    fn telemetry_transport(&self, telemetry: &TelemetryConfig) -> Box<dyn TelemetryTransport> {
        let script = telemetry
            .topics
            .iter()
            .enumerate()
            .map(|(i, topic)| TelemetryMessage {
                topic: topic.clone(),
                payload: serde_json::json!({ "value": i as f64 * 0.5, "ok": true }),
            })
            .collect();
        Box::new(ScriptedTelemetryFeed::new(script, self.telemetry_interval).repeating())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pattern_round_trip() {
        let mut source = PatternSource::new(4, 2, Duration::from_millis(1));
        source.open().await.unwrap();

        let packet = source.read_packet().await.unwrap();
        let image = PatternDecoder::new().decode(&packet).unwrap();

        assert_eq!(image.width, 4);
        assert_eq!(image.height, 2);
        assert_eq!(image.pixels.len(), 4 * 2 * 4);
    }

    #[tokio::test]
    async fn test_corrupt_packet_fails_decode_only() {
        let mut source = PatternSource::new(4, 2, Duration::from_millis(1)).corrupt_every(1);
        source.open().await.unwrap();

        let packet = source.read_packet().await.unwrap();
        assert!(PatternDecoder::new().decode(&packet).is_err());

        // The stream itself keeps going
        assert!(source.read_packet().await.is_ok());
    }
}
