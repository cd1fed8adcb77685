//! Configuration snapshots
//!
//! An [`AppConfig`] is an immutable snapshot consumed by the lifecycle
//! manager at build/rebuild time; the core never mutates it. Where the
//! settings come from (file, GUI settings panel, defaults) is the shell's
//! concern; this module only parses and validates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::CapturePolicy;

/// Full configuration snapshot for one pipeline build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cameras to build links for
    pub cameras: Vec<CameraConfig>,

    /// Telemetry bus settings
    pub telemetry: TelemetryConfig,

    /// Back-capture history settings
    pub backcapture: BackCaptureConfig,

    /// Capture storage settings
    pub storage: StorageConfig,

    /// Lifecycle tuning (retry, shutdown, keepalive)
    pub lifecycle: LifecycleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cameras: vec![CameraConfig::default()],
            telemetry: TelemetryConfig::default(),
            backcapture: BackCaptureConfig::default(),
            storage: StorageConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&text).with_context(|| format!("cannot parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the snapshot for values the pipeline cannot be built from
    pub fn validate(&self) -> Result<()> {
        for camera in &self.cameras {
            if camera.name.is_empty() {
                bail!("camera with empty name");
            }
            let dupes = self
                .cameras
                .iter()
                .filter(|c| c.name == camera.name)
                .count();
            if dupes > 1 {
                bail!("duplicate camera name {:?}", camera.name);
            }
        }
        match self.backcapture.mode {
            CaptureMode::Frames if self.backcapture.frames == 0 => {
                bail!("backcapture.frames must be > 0")
            }
            CaptureMode::Window if self.backcapture.window_secs == 0 => {
                bail!("backcapture.window_secs must be > 0")
            }
            _ => {}
        }
        if self.lifecycle.shutdown_timeout_ms == 0 {
            bail!("lifecycle.shutdown_timeout_ms must be > 0");
        }
        Ok(())
    }
}

/// One camera: stream endpoint plus optional PTZ control endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Link name, unique among cameras
    pub name: String,

    /// Camera host address
    pub address: String,

    /// RTSP stream port
    pub rtsp_port: u16,

    /// PTZ control port
    pub ptz_port: u16,

    /// Stream credentials
    pub login: String,
    pub password: String,

    /// Stream path on the camera
    pub stream_path: String,

    /// Whether to build the video link
    pub enable_stream: bool,

    /// Whether to build the PTZ control link
    pub enable_ptz: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "cam0".to_string(),
            address: "192.168.1.35".to_string(),
            rtsp_port: 554,
            ptz_port: 80,
            login: "admin".to_string(),
            password: "admin".to_string(),
            stream_path: "/live/0/MAIN".to_string(),
            enable_stream: true,
            enable_ptz: true,
        }
    }
}

/// Telemetry bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Whether to build the telemetry link
    pub enable: bool,

    /// Bus broker address
    pub address: String,

    /// Topics to subscribe to
    pub topics: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable: true,
            address: "192.168.1.20:1883".to_string(),
            topics: vec![
                "rover/velocity".to_string(),
                "rover/battery".to_string(),
                "rover/estop".to_string(),
            ],
        }
    }
}

/// Capacity mode for the back-capture history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Bound by frame count
    Frames,
    /// Bound by time window
    Window,
}

/// Back-capture history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackCaptureConfig {
    /// Which bound applies
    pub mode: CaptureMode,

    /// Frame-count bound (`mode = "frames"`)
    pub frames: usize,

    /// Time-window bound in seconds (`mode = "window"`)
    pub window_secs: u64,
}

impl Default for BackCaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Window,
            frames: 300,
            window_secs: 10,
        }
    }
}

impl BackCaptureConfig {
    /// Capacity policy this configuration describes
    pub fn policy(&self) -> CapturePolicy {
        match self.mode {
            CaptureMode::Frames => CapturePolicy::Frames(self.frames),
            CaptureMode::Window => CapturePolicy::Window(Duration::from_secs(self.window_secs)),
        }
    }
}

/// Capture storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory captures are published into
    pub capture_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capture_dir: PathBuf::from("captures"),
        }
    }
}

/// Lifecycle tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Base delay before re-running a faulted link, in milliseconds
    pub retry_delay_ms: u64,

    /// Give up after this many consecutive failed attempts (0 = never)
    pub max_retries: u32,

    /// How long teardown waits for a link task before aborting it
    pub shutdown_timeout_ms: u64,

    /// Cadence for re-sending an active PTZ motion
    pub ptz_keepalive_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            max_retries: 0,
            shutdown_timeout_ms: 3000,
            ptz_keepalive_ms: 400,
        }
    }
}

impl LifecycleConfig {
    /// Base retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Teardown wait per link task
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// PTZ keepalive cadence
    pub fn ptz_keepalive(&self) -> Duration {
        Duration::from_millis(self.ptz_keepalive_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [[cameras]]
            name = "nav"
            address = "10.0.0.9"
            enable_ptz = false

            [backcapture]
            mode = "frames"
            frames = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.cameras.len(), 1);
        assert_eq!(config.cameras[0].name, "nav");
        assert!(!config.cameras[0].enable_ptz);
        assert_eq!(config.backcapture.policy(), CapturePolicy::Frames(120));
        // Unspecified sections fall back to defaults
        assert!(config.telemetry.enable);
    }

    #[test]
    fn test_duplicate_camera_names_rejected() {
        let mut config = AppConfig::default();
        config.cameras.push(config.cameras[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = AppConfig::default();
        config.backcapture.mode = CaptureMode::Window;
        config.backcapture.window_secs = 0;
        assert!(config.validate().is_err());
    }
}
