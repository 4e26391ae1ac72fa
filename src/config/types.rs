use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub detect: DetectConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable host name or IP, embedded in the player page.
    /// The `/` route fails with a server error when this is unset.
    #[serde(default)]
    pub public_host: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
        }
    }
}

/// Which kind of capture run the controller supervises. Fixed at
/// configuration time; not mutable while the server is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Continuous segmented HLS output from one long-lived encoder process.
    Stream,
    /// A recurring single-frame capture publishing the latest still image.
    Snapshot,
}

impl Default for CaptureMode {
    fn default() -> Self {
        CaptureMode::Stream
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub mode: CaptureMode,

    /// Directory receiving segments, the manifest, and published snapshots.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Target duration of one HLS segment in seconds.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    /// Number of segments kept in the manifest's trailing window.
    #[serde(default = "default_segment_list_size")]
    pub segment_list_size: u32,

    /// Seconds between snapshot captures (snapshot mode only).
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./hls")
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_framerate() -> u32 {
    30
}
fn default_segment_seconds() -> u32 {
    2
}
fn default_segment_list_size() -> u32 {
    15
}
fn default_snapshot_interval() -> u64 {
    3
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            output_dir: default_output_dir(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            segment_seconds: default_segment_seconds(),
            segment_list_size: default_segment_list_size(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

impl CaptureConfig {
    /// Resolution in ffmpeg's `WxH` form.
    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectConfig {
    /// Regex matched against `v4l2-ctl --list-devices` device-name lines.
    #[serde(default = "default_v4l2_pattern")]
    pub v4l2_pattern: String,

    /// Camera name looked up in AVFoundation's device listing on macOS.
    #[serde(default = "default_avfoundation_name")]
    pub avfoundation_name: String,
}

fn default_v4l2_pattern() -> String {
    r"NGS XPRESSCAM\d+".to_string()
}
fn default_avfoundation_name() -> String {
    "FaceTime HD Camera".to_string()
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            v4l2_pattern: default_v4l2_pattern(),
            avfoundation_name: default_avfoundation_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary (looked up on PATH when unset)
    #[serde(default)]
    pub ffmpeg: Option<PathBuf>,

    /// Path to the v4l2-ctl binary (looked up on PATH when unset)
    #[serde(default)]
    pub v4l2_ctl: Option<PathBuf>,
}

impl ToolsConfig {
    /// The encoder program to spawn, preferring the configured path.
    pub fn ffmpeg_program(&self) -> PathBuf {
        self.ffmpeg
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    pub fn v4l2_ctl_program(&self) -> PathBuf {
        self.v4l2_ctl
            .clone()
            .unwrap_or_else(|| PathBuf::from("v4l2-ctl"))
    }
}
