//! Telemetry device link: bus receive loop with fan-out

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::info;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::error::LinkError;
use super::transport::{TelemetryMessage, TelemetryTransport};
use super::DeviceLink;
use crate::pipeline::{LinkHealth, PipelineClock, SharedConnectionState};

/// Last received message per topic, shared with status readers
pub type TopicCache = Arc<Mutex<HashMap<String, TelemetryMessage>>>;

/// Telemetry bus link
///
/// Every received message is retained as the last value for its topic and
/// fanned out on a broadcast channel; subscribers that cannot keep up lag
/// on their own receiver without slowing the bus loop down.
pub struct TelemetryLink {
    name: String,
    transport: Box<dyn TelemetryTransport>,
    fanout: broadcast::Sender<TelemetryMessage>,
    latest: TopicCache,
    state: SharedConnectionState,
    health: Arc<LinkHealth>,
    clock: PipelineClock,
    cancel: CancellationToken,
}

impl TelemetryLink {
    /// Create a new telemetry link over the given transport
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        transport: Box<dyn TelemetryTransport>,
        fanout: broadcast::Sender<TelemetryMessage>,
        latest: TopicCache,
        state: SharedConnectionState,
        health: Arc<LinkHealth>,
        clock: PipelineClock,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            fanout,
            latest,
            state,
            health,
            clock,
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
}

#[async_trait]
impl DeviceLink for TelemetryLink {
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
        info!("{}: bus session opened", self.name);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return self.close_orderly().await;
                }
                message = self.transport.next_message() => {
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            self.state.link_lost()?;
                            self.health.record_transport_error();
                            self.transport.close().await;
                            return Err(LinkError::stream(e));
                        }
                    };

                    self.latest
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(message.topic.clone(), message.clone());
                    // No subscribers is not an error
                    let _ = self.fanout.send(message);
                    self.health.record_event(&self.clock);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::sim::ScriptedTelemetryFeed;
    use crate::pipeline::ConnectionPhase;
    use std::time::Duration;

    fn message(topic: &str, value: i64) -> TelemetryMessage {
        TelemetryMessage {
            topic: topic.to_string(),
            payload: serde_json::json!({ "value": value }),
        }
    }

    #[tokio::test]
    async fn test_fanout_and_topic_cache() {
        let feed = ScriptedTelemetryFeed::new(
            vec![
                message("rover/vel", 1),
                message("rover/estop", 0),
                message("rover/vel", 2),
            ],
            Duration::from_millis(1),
        );
        let (fanout, mut rx) = broadcast::channel(16);
        let latest: TopicCache = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let mut link = TelemetryLink::new(
            "bus",
            Box::new(feed),
            fanout,
            Arc::clone(&latest),
            SharedConnectionState::new(),
            Arc::new(LinkHealth::new()),
            PipelineClock::new(),
            cancel.clone(),
        );
        let task = tokio::spawn(async move { link.run().await });

        let mut seen = 0;
        while seen < 3 {
            rx.recv().await.unwrap();
            seen += 1;
        }

        // Last value per topic is retained for late readers
        let cache = latest.lock().unwrap();
        assert_eq!(cache["rover/vel"].payload["value"], 2);
        assert_eq!(cache["rover/estop"].payload["value"], 0);
        drop(cache);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bus_failure_faults_link() {
        let feed = ScriptedTelemetryFeed::new(vec![message("rover/vel", 1)], Duration::from_millis(1))
            .fail_when_exhausted();
        let (fanout, _rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let mut link = TelemetryLink::new(
            "bus",
            Box::new(feed),
            fanout,
            Arc::new(Mutex::new(HashMap::new())),
            SharedConnectionState::new(),
            Arc::new(LinkHealth::new()),
            PipelineClock::new(),
            cancel,
        );
        let state = link.state().clone();
        let result = link.run().await;

        assert!(matches!(result, Err(LinkError::Stream { .. })));
        assert_eq!(state.phase(), ConnectionPhase::Faulted);
    }
}
