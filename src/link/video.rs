//! Video device link: receive → decode → publish/feed

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::error::LinkError;
use super::transport::{FrameDecoder, VideoSource};
use super::DeviceLink;
use crate::pipeline::{BackCapture, FrameChannel, LinkHealth, PipelineClock, SharedConnectionState, VideoFrame};

/// Video link: owns the receive loop that feeds the frame pipeline
///
/// Each successfully decoded frame is fed to the back-capture history and
/// published to the frame channel (in that order, as two independent
/// copies). A malformed frame is dropped and the connection stays `Opened`;
/// a transport read failure faults the link and ends the loop.
pub struct VideoLink {
    name: String,
    source: Box<dyn VideoSource>,
    decoder: Box<dyn FrameDecoder>,
    state: SharedConnectionState,
    channel: Arc<FrameChannel>,
    backcapture: Arc<BackCapture>,
    health: Arc<LinkHealth>,
    clock: PipelineClock,
    cancel: CancellationToken,
}

impl VideoLink {
    /// Create a new video link over the given collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn VideoSource>,
        decoder: Box<dyn FrameDecoder>,
        state: SharedConnectionState,
        channel: Arc<FrameChannel>,
        backcapture: Arc<BackCapture>,
        health: Arc<LinkHealth>,
        clock: PipelineClock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            decoder,
            state,
            channel,
            backcapture,
            health,
            clock,
            cancel,
        }
    }

    async fn close_orderly(&mut self) -> Result<(), LinkError> {
        self.state.begin_close()?;
        self.source.close().await;
        self.state.close_completed()?;
        info!("{}: closed", self.name);
        Ok(())
    }
}

#[async_trait]
impl DeviceLink for VideoLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &SharedConnectionState {
        &self.state
    }

    async fn run(&mut self) -> Result<(), LinkError> {
        self.state.begin_connect()?;

        tokio::select! {
            _ = self.cancel.cancelled() => {
                return self.close_orderly().await;
            }
            opened = self.source.open() => {
                if let Err(e) = opened {
                    self.state.connect_failed()?;
                    self.health.record_transport_error();
                    return Err(LinkError::connect(e));
                }
            }
        }

        self.state.connect_succeeded()?;
        info!("{}: stream opened", self.name);

        let mut last_stats = Instant::now();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.close_orderly().await;
                }
                packet = self.source.read_packet() => {
                    let packet = match packet {
                        Ok(packet) => packet,
                        Err(e) => {
                            self.state.link_lost()?;
                            self.health.record_transport_error();
                            self.source.close().await;
                            return Err(LinkError::stream(e));
                        }
                    };

                    match self.decoder.decode(&packet) {
                        Ok(image) => {
                            let frame = VideoFrame::new(
                                image.pixels,
                                image.width,
                                image.height,
                                self.clock.now(),
                            );
                            // History gets its own copy; the channel takes
                            // ownership of this one
                            self.backcapture.feed(frame.clone());
                            self.channel.publish(frame);
                            self.health.record_event(&self.clock);
                        }
                        Err(e) => {
                            // Malformed frame: drop it, stay connected
                            warn!("{}: dropping undecodable frame: {}", self.name, e);
                            self.health.record_decode_failure();
                        }
                    }

                    if last_stats.elapsed().as_secs() >= 30 {
                        info!("{}: {}", self.name, self.health.summary());
                        last_stats = Instant::now();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::sim::{PatternDecoder, PatternSource};
    use crate::pipeline::{CapturePolicy, ConnectionPhase};
    use std::time::Duration;

    fn build_link(source: PatternSource, cancel: CancellationToken) -> (VideoLink, Arc<FrameChannel>, Arc<BackCapture>) {
        let clock = PipelineClock::new();
        let channel = Arc::new(FrameChannel::new(clock.clone()));
        let backcapture = Arc::new(BackCapture::new(CapturePolicy::Frames(16), clock.clone()));
        let link = VideoLink::new(
            "cam0",
            Box::new(source),
            Box::new(PatternDecoder::new()),
            SharedConnectionState::new(),
            Arc::clone(&channel),
            Arc::clone(&backcapture),
            Arc::new(LinkHealth::new()),
            clock,
            cancel,
        );
        (link, channel, backcapture)
    }

    #[tokio::test]
    async fn test_frames_flow_until_cancelled() {
        let source = PatternSource::new(8, 8, Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let (mut link, channel, backcapture) = build_link(source, cancel.clone());

        let task = tokio::spawn(async move { link.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.take_if_new().is_some());
        assert!(!backcapture.is_empty());

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("receive loop must observe cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_read_failure_faults_link() {
        let source = PatternSource::new(4, 4, Duration::from_millis(1)).fail_after(3);
        let cancel = CancellationToken::new();
        let (mut link, _channel, _backcapture) = build_link(source, cancel);

        let state = link.state().clone();
        let result = link.run().await;

        assert!(matches!(result, Err(LinkError::Stream { .. })));
        assert_eq!(state.phase(), ConnectionPhase::Faulted);
    }

    #[tokio::test]
    async fn test_refused_connect_faults_link() {
        let source = PatternSource::new(4, 4, Duration::from_millis(1)).refuse_connect();
        let cancel = CancellationToken::new();
        let (mut link, _channel, _backcapture) = build_link(source, cancel);

        let state = link.state().clone();
        let result = link.run().await;

        assert!(matches!(result, Err(LinkError::Connect { .. })));
        assert_eq!(state.phase(), ConnectionPhase::Faulted);
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_link_open() {
        let source = PatternSource::new(4, 4, Duration::from_millis(1)).corrupt_every(2);
        let cancel = CancellationToken::new();
        let (mut link, channel, _backcapture) = build_link(source, cancel.clone());

        let state = link.state().clone();
        let task = tokio::spawn(async move { link.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.phase(), ConnectionPhase::Opened);
        assert!(channel.take_if_new().is_some());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
