//! PTZ device link: latest-wins move-vector forwarding

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::LinkError;
use super::transport::{PtzTransport, PtzVector};
use super::DeviceLink;
use crate::pipeline::{LinkHealth, PipelineClock, SharedConnectionState};

/// PTZ control link
///
/// Move vectors arrive on a `watch` channel, so a burst of input updates
/// coalesces to the most recent value; the camera only ever needs the
/// current request. While a non-zero motion is active the link re-sends it
/// on the keepalive cadence, matching how continuous-move endpoints expect
/// to be refreshed.
pub struct PtzLink {
    name: String,
    transport: Box<dyn PtzTransport>,
    commands: watch::Receiver<PtzVector>,
    state: SharedConnectionState,
    health: Arc<LinkHealth>,
    clock: PipelineClock,
    keepalive: Duration,
    cancel: CancellationToken,
}

impl PtzLink {
    /// Create a new PTZ link over the given transport
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn PtzTransport>,
        commands: watch::Receiver<PtzVector>,
        state: SharedConnectionState,
        health: Arc<LinkHealth>,
        clock: PipelineClock,
        keepalive: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            commands,
            state,
            health,
            clock,
            keepalive,
            cancel,
        }
    }

    async fn close_orderly(&mut self) -> Result<(), LinkError> {
        self.state.begin_close()?;
        self.transport.close().await;
        self.state.close_completed()?;
        info!("{}: closed", self.name);
        Ok(())
    }

    async fn send_current(&mut self, vector: PtzVector) -> Result<(), LinkError> {
        if let Err(e) = self.transport.send_move(vector).await {
            self.state.link_lost()?;
            self.health.record_transport_error();
            self.transport.close().await;
            return Err(LinkError::stream(e));
        }
        debug!("{}: move {}", self.name, vector);
        self.health.record_event(&self.clock);
        Ok(())
    }
}

#[async_trait]
impl DeviceLink for PtzLink {
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
            opened = self.transport.open() => {
                if let Err(e) = opened {
                    self.state.connect_failed()?;
                    self.health.record_transport_error();
                    return Err(LinkError::connect(e));
                }
            }
        }

        self.state.connect_succeeded()?;
        info!("{}: control session opened", self.name);

        let mut current = *self.commands.borrow();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.close_orderly().await;
                }
                changed = self.commands.changed() => {
                    if changed.is_err() {
                        // Command source dropped: nothing left to forward
                        return self.close_orderly().await;
                    }
                    current = *self.commands.borrow_and_update();
                    self.send_current(current).await?;
                }
                _ = tokio::time::sleep(self.keepalive) => {
                    // Refresh an active motion; idle sessions stay quiet
                    if !current.is_zero() {
                        self.send_current(current).await?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::sim::RecordingPtzEndpoint;
    use crate::pipeline::ConnectionPhase;

    fn vector(pan: f64) -> PtzVector {
        PtzVector {
            pan,
            tilt: 0.0,
            zoom: 0.0,
        }
    }

    #[tokio::test]
    async fn test_forwards_latest_vector() {
        let endpoint = RecordingPtzEndpoint::new();
        let sent = endpoint.sent();
        let (tx, rx) = watch::channel(PtzVector::default());
        let cancel = CancellationToken::new();

        let mut link = PtzLink::new(
            "ptz0",
            Box::new(endpoint),
            rx,
            SharedConnectionState::new(),
            Arc::new(LinkHealth::new()),
            PipelineClock::new(),
            Duration::from_secs(5),
            cancel.clone(),
        );
        let state = link.state().clone();
        let task = tokio::spawn(async move { link.run().await });

        tx.send(vector(0.5)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(state.phase(), ConnectionPhase::Opened);
        assert_eq!(sent.lock().unwrap().last().unwrap().pan, 0.5);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(state.phase(), ConnectionPhase::Closed);
    }

    #[tokio::test]
    async fn test_keepalive_resends_active_motion() {
        let endpoint = RecordingPtzEndpoint::new();
        let sent = endpoint.sent();
        let (tx, rx) = watch::channel(PtzVector::default());
        let cancel = CancellationToken::new();

        let mut link = PtzLink::new(
            "ptz0",
            Box::new(endpoint),
            rx,
            SharedConnectionState::new(),
            Arc::new(LinkHealth::new()),
            PipelineClock::new(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        let task = tokio::spawn(async move { link.run().await });

        tx.send(vector(1.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        // One direct send plus several keepalive refreshes
        assert!(sent.lock().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_send_failure_faults_link() {
        let endpoint = RecordingPtzEndpoint::new().fail_sends();
        let (tx, rx) = watch::channel(PtzVector::default());
        let cancel = CancellationToken::new();

        let mut link = PtzLink::new(
            "ptz0",
            Box::new(endpoint),
            rx,
            SharedConnectionState::new(),
            Arc::new(LinkHealth::new()),
            PipelineClock::new(),
            Duration::from_secs(5),
            cancel,
        );
        let state = link.state().clone();
        let task = tokio::spawn(async move { link.run().await });

        tx.send(vector(0.3)).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(LinkError::Stream { .. })));
        assert_eq!(state.phase(), ConnectionPhase::Faulted);
    }
}
