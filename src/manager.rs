//! Pipeline lifecycle management
//!
//! Builds the full set of device links from a configuration snapshot, wires
//! the cross-component subscriptions, and can atomically tear the whole
//! graph down and rebuild it when the configuration changes. After a
//! teardown no task from the previous generation is runnable and no
//! subscription survives, so a rebuild can never leak listeners or leave a
//! receive loop writing into freed buffers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::link::telemetry::TopicCache;
use crate::link::{
    DeviceLink, PtzLink, PtzVector, TelemetryLink, TelemetryMessage, TransportFactory, VideoLink,
};
use crate::pipeline::{
    BackCapture, ConnectionPhase, FrameChannel, LinkHealth, PipelineClock, SharedConnectionState,
    VideoFrame,
};
use crate::storage::FrameStore;

/// Capacity of the telemetry fan-out ring
const FANOUT_CAPACITY: usize = 64;

/// Ceiling for the reconnect backoff
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Kind of device link, for the status display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Video,
    Ptz,
    Telemetry,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Video => write!(f, "video"),
            LinkKind::Ptz => write!(f, "ptz"),
            LinkKind::Telemetry => write!(f, "telemetry"),
        }
    }
}

/// Read-only status of one link, for presentation
#[derive(Debug, Clone)]
pub struct LinkStatus {
    /// Link name
    pub name: String,

    /// Link kind
    pub kind: LinkKind,

    /// Current connection phase
    pub phase: ConnectionPhase,

    /// Time spent in the current phase
    pub in_phase: Duration,

    /// Age of the latest published frame (video links)
    pub frame_age: Option<Duration>,

    /// Age of the last successful activity on the link
    pub activity_age: Option<Duration>,

    /// Frames currently held in the back-capture history (video links)
    pub buffered_frames: usize,
}

/// Handle to a registered telemetry listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySubscription(u64);

struct ListenerSpec {
    id: u64,
    topic_prefix: Option<String>,
    sender: mpsc::Sender<TelemetryMessage>,
}

struct VideoHandles {
    name: String,
    state: SharedConnectionState,
    channel: Arc<FrameChannel>,
    backcapture: Arc<BackCapture>,
    health: Arc<LinkHealth>,
}

struct PtzHandles {
    name: String,
    state: SharedConnectionState,
    commands: watch::Sender<PtzVector>,
    health: Arc<LinkHealth>,
}

struct TelemetryHandles {
    name: String,
    state: SharedConnectionState,
    fanout: broadcast::Sender<TelemetryMessage>,
    latest: TopicCache,
    health: Arc<LinkHealth>,
}

/// One built generation of the link graph
struct PipelineGraph {
    clock: PipelineClock,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    forwarders: Vec<(u64, JoinHandle<()>)>,
    videos: Vec<VideoHandles>,
    ptz: Option<PtzHandles>,
    telemetry: Option<TelemetryHandles>,
}

/// Builds, supervises, and rebuilds the device-link graph
pub struct PipelineManager {
    config: AppConfig,
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn FrameStore>,
    listeners: Vec<ListenerSpec>,
    next_listener_id: u64,
    current: Option<PipelineGraph>,
}

impl PipelineManager {
    /// Create a manager over the given collaborators; nothing is built yet
    pub fn new(
        config: AppConfig,
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn FrameStore>,
    ) -> Self {
        Self {
            config,
            factory,
            store,
            listeners: Vec::new(),
            next_listener_id: 0,
            current: None,
        }
    }

    /// The configuration snapshot the current graph was built from
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Build the link graph from the current configuration
    ///
    /// Must only be called with no graph alive; `rebuild` is the one-call
    /// variant for configuration changes.
    pub fn build(&mut self) -> Result<()> {
        if self.current.is_some() {
            anyhow::bail!("pipeline already built; use rebuild()");
        }
        self.config.validate()?;

        let clock = PipelineClock::new();
        let cancel = CancellationToken::new();
        let mut graph = PipelineGraph {
            clock: clock.clone(),
            cancel: cancel.clone(),
            tasks: Vec::new(),
            forwarders: Vec::new(),
            videos: Vec::new(),
            ptz: None,
            telemetry: None,
        };

        for camera in self.config.cameras.iter().filter(|c| c.enable_stream) {
            let state = SharedConnectionState::new();
            let channel = Arc::new(FrameChannel::new(clock.clone()));
            let backcapture = Arc::new(BackCapture::new(
                self.config.backcapture.policy(),
                clock.clone(),
            ));
            let health = Arc::new(LinkHealth::new());

            let link = VideoLink::new(
                camera.name.clone(),
                self.factory.video_source(camera),
                self.factory.frame_decoder(camera),
                state.clone(),
                Arc::clone(&channel),
                Arc::clone(&backcapture),
                Arc::clone(&health),
                clock.clone(),
                cancel.child_token(),
            );
            graph
                .tasks
                .push((camera.name.clone(), self.spawn_supervised(link, &cancel, &health)));
            graph.videos.push(VideoHandles {
                name: camera.name.clone(),
                state,
                channel,
                backcapture,
                health,
            });
        }

        if let Some(camera) = self.config.cameras.iter().find(|c| c.enable_ptz) {
            let name = format!("{}-ptz", camera.name);
            let state = SharedConnectionState::new();
            let health = Arc::new(LinkHealth::new());
            let (commands, commands_rx) = watch::channel(PtzVector::default());

            let link = PtzLink::new(
                name.clone(),
                self.factory.ptz_transport(camera),
                commands_rx,
                state.clone(),
                Arc::clone(&health),
                clock.clone(),
                self.config.lifecycle.ptz_keepalive(),
                cancel.child_token(),
            );
            graph
                .tasks
                .push((name.clone(), self.spawn_supervised(link, &cancel, &health)));
            graph.ptz = Some(PtzHandles {
                name,
                state,
                commands,
                health,
            });
        }

        if self.config.telemetry.enable {
            let name = "telemetry".to_string();
            let state = SharedConnectionState::new();
            let health = Arc::new(LinkHealth::new());
            let (fanout, _) = broadcast::channel(FANOUT_CAPACITY);
            let latest: TopicCache = Arc::default();

            let link = TelemetryLink::new(
                name.clone(),
                self.factory.telemetry_transport(&self.config.telemetry),
                fanout.clone(),
                Arc::clone(&latest),
                state.clone(),
                Arc::clone(&health),
                clock.clone(),
                cancel.child_token(),
            );
            graph
                .tasks
                .push((name.clone(), self.spawn_supervised(link, &cancel, &health)));

            for spec in &self.listeners {
                graph.forwarders.push((spec.id, spawn_forwarder(spec, &fanout)));
            }
            graph.telemetry = Some(TelemetryHandles {
                name,
                state,
                fanout,
                latest,
                health,
            });
        }

        info!(
            "PipelineManager: built {} link(s), {} listener forwarder(s)",
            graph.tasks.len(),
            graph.forwarders.len()
        );
        self.current = Some(graph);
        Ok(())
    }

    /// Tear everything down and build again from a new snapshot
    ///
    /// When this returns, no task or timer from the previous generation is
    /// runnable and every registered listener is wired exactly once to the
    /// new graph.
    pub async fn rebuild(&mut self, new_config: AppConfig) -> Result<()> {
        info!("PipelineManager: rebuilding pipeline");
        self.teardown().await;
        self.config = new_config;
        self.build()
    }

    /// Stop every link and drop the graph; idempotent
    pub async fn teardown(&mut self) {
        let Some(mut graph) = self.current.take() else {
            return;
        };

        graph.cancel.cancel();
        let grace = self.config.lifecycle.shutdown_timeout();
        for (name, mut handle) in graph.tasks.drain(..) {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{}: link task failed to join: {}", name, e),
                Err(_) => {
                    warn!("{}: did not stop within {:?}, aborting", name, grace);
                    handle.abort();
                }
            }
        }
        for (_, handle) in graph.forwarders.drain(..) {
            handle.abort();
        }
        // Buffers held by the graph are released only now, after every
        // receive loop has exited
        info!("PipelineManager: pipeline torn down");
    }

    /// Read-only status of every link, for the display collaborator
    pub fn status(&self) -> Vec<LinkStatus> {
        let Some(graph) = &self.current else {
            return Vec::new();
        };
        let mut out = Vec::new();

        for video in &graph.videos {
            out.push(LinkStatus {
                name: video.name.clone(),
                kind: LinkKind::Video,
                phase: video.state.phase(),
                in_phase: video.state.elapsed_since_transition(),
                frame_age: video.channel.latest_age(),
                activity_age: video.health.last_activity().map(|ts| graph.clock.age_of(ts)),
                buffered_frames: video.backcapture.len(),
            });
        }
        if let Some(ptz) = &graph.ptz {
            out.push(LinkStatus {
                name: ptz.name.clone(),
                kind: LinkKind::Ptz,
                phase: ptz.state.phase(),
                in_phase: ptz.state.elapsed_since_transition(),
                frame_age: None,
                activity_age: ptz.health.last_activity().map(|ts| graph.clock.age_of(ts)),
                buffered_frames: 0,
            });
        }
        if let Some(telemetry) = &graph.telemetry {
            out.push(LinkStatus {
                name: telemetry.name.clone(),
                kind: LinkKind::Telemetry,
                phase: telemetry.state.phase(),
                in_phase: telemetry.state.elapsed_since_transition(),
                frame_age: None,
                activity_age: telemetry
                    .health
                    .last_activity()
                    .map(|ts| graph.clock.age_of(ts)),
                buffered_frames: 0,
            });
        }
        out
    }

    /// Consumer tick: take the freshest frame per camera and evict stale
    /// back-capture history
    pub fn render_tick(&self) -> Vec<(String, VideoFrame)> {
        let Some(graph) = &self.current else {
            return Vec::new();
        };
        let mut frames = Vec::new();
        for video in &graph.videos {
            video.backcapture.evict_stale();
            if let Some(frame) = video.channel.take_if_new() {
                frames.push((video.name.clone(), frame));
            }
        }
        frames
    }

    /// Forward a PTZ move request to the control link
    pub fn ptz_command(&self, vector: PtzVector) -> Result<()> {
        let graph = self.current.as_ref().context("pipeline not built")?;
        let ptz = graph.ptz.as_ref().context("no PTZ link configured")?;
        ptz.commands
            .send(vector)
            .map_err(|_| anyhow::anyhow!("PTZ link is not running"))
    }

    /// Save every camera's back-capture history; the user-triggered action
    ///
    /// Storage failures are surfaced to the caller; the buffers themselves
    /// are unchanged either way.
    pub async fn save_backcapture(&self) -> Result<Vec<PathBuf>> {
        let graph = self.current.as_ref().context("pipeline not built")?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut saved = Vec::new();

        for video in &graph.videos {
            if video.backcapture.is_empty() {
                warn!("{}: no history to save", video.name);
                continue;
            }
            let label = format!("{}_backcapture_{}", video.name, stamp);
            let store = Arc::clone(&self.store);
            let backcapture = Arc::clone(&video.backcapture);
            let path = tokio::task::spawn_blocking(move || {
                backcapture.flush_to_storage(store.as_ref(), &label)
            })
            .await
            .context("storage task failed")??;
            info!("{}: back-capture saved to {:?}", video.name, path);
            saved.push(path);
        }
        Ok(saved)
    }

    /// Save the latest frame of every camera as a still capture
    pub async fn save_snapshot(&self) -> Result<Vec<PathBuf>> {
        let graph = self.current.as_ref().context("pipeline not built")?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut saved = Vec::new();

        for video in &graph.videos {
            let Some(frame) = video.channel.snapshot_latest() else {
                warn!("{}: no frame to capture", video.name);
                continue;
            };
            let label = format!("{}_still_{}", video.name, stamp);
            let store = Arc::clone(&self.store);
            let path =
                tokio::task::spawn_blocking(move || store.store(&label, std::slice::from_ref(&frame)))
                    .await
                    .context("storage task failed")??;
            info!("{}: still frame saved to {:?}", video.name, path);
            saved.push(path);
        }
        Ok(saved)
    }

    /// Register a telemetry listener; survives rebuilds until unsubscribed
    ///
    /// Messages whose topic starts with `topic_prefix` (all messages when
    /// `None`) are forwarded to `sender`. The listener is wired to the
    /// current graph immediately and re-wired exactly once per rebuild.
    pub fn subscribe_telemetry(
        &mut self,
        topic_prefix: Option<String>,
        sender: mpsc::Sender<TelemetryMessage>,
    ) -> TelemetrySubscription {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        let spec = ListenerSpec {
            id,
            topic_prefix,
            sender,
        };

        if let Some(graph) = &mut self.current
            && let Some(telemetry) = &graph.telemetry
        {
            graph
                .forwarders
                .push((id, spawn_forwarder(&spec, &telemetry.fanout)));
        }
        self.listeners.push(spec);
        TelemetrySubscription(id)
    }

    /// Remove a telemetry listener and stop its forwarder
    pub fn unsubscribe_telemetry(&mut self, subscription: TelemetrySubscription) {
        self.listeners.retain(|spec| spec.id != subscription.0);
        if let Some(graph) = &mut self.current {
            graph.forwarders.retain(|(id, handle)| {
                if *id == subscription.0 {
                    handle.abort();
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Last message received on a topic, if any
    pub fn latest_telemetry(&self, topic: &str) -> Option<TelemetryMessage> {
        let telemetry = self.current.as_ref()?.telemetry.as_ref()?;
        let cache = telemetry.latest.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(topic).cloned()
    }

    /// Spawn a link task with the lifecycle retry policy wrapped around it
    ///
    /// The link itself never retries; this loop re-invokes `run` (a fresh
    /// `begin_connect`) after a backoff whenever it faults, until cancelled
    /// or the attempt budget runs out.
    fn spawn_supervised(
        &self,
        mut link: impl DeviceLink + 'static,
        cancel: &CancellationToken,
        health: &Arc<LinkHealth>,
    ) -> JoinHandle<()> {
        let cancel = cancel.clone();
        let health = Arc::clone(health);
        let base_delay = self.config.lifecycle.retry_delay();
        let max_retries = self.config.lifecycle.max_retries;

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match link.run().await {
                    Ok(()) => break,
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        attempt += 1;
                        if max_retries != 0 && attempt > max_retries {
                            error!(
                                "{}: giving up after {} failed attempts: {}",
                                link.name(),
                                max_retries,
                                e
                            );
                            break;
                        }
                        let delay = backoff_delay(base_delay, attempt);
                        warn!(
                            "{}: {}, reconnecting in {:?} (attempt {})",
                            link.name(),
                            e,
                            delay,
                            attempt
                        );
                        health.record_reconnect();
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        })
    }
}

/// Exponential backoff from the configured base delay, capped
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(8);
    (base * factor).min(MAX_RETRY_DELAY)
}

fn spawn_forwarder(
    spec: &ListenerSpec,
    fanout: &broadcast::Sender<TelemetryMessage>,
) -> JoinHandle<()> {
    let mut rx = fanout.subscribe();
    let sender = spec.sender.clone();
    let prefix = spec.topic_prefix.clone();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let wanted = prefix
                        .as_deref()
                        .map_or(true, |p| message.topic.starts_with(p));
                    if wanted && sender.send(message).await.is_err() {
                        // Listener side hung up
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("telemetry listener lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
