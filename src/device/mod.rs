//! Capture device detection.
//!
//! Probes the host for a usable camera and produces a [`DeviceSelection`]
//! consumed by the encoder argument builder. Detection is best-effort: any
//! probing failure degrades to the synthetic test-pattern source instead of
//! propagating an error.

use anyhow::{Context, Result};
use regex::Regex;
use std::process::Command;
use tracing::{info, warn};

use crate::config::{DetectConfig, ToolsConfig};

/// Capture backend the selected device is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePlatform {
    /// Video4Linux2 device node on POSIX hosts.
    V4l2,
    /// AVFoundation device index on macOS.
    AvFoundation,
    /// No physical device; the encoder generates a test pattern.
    Synthetic,
}

/// The camera (or lack of one) chosen for this process.
///
/// Constructed through [`DeviceSelection::v4l2`], [`DeviceSelection::avfoundation`]
/// or [`DeviceSelection::synthetic`] so that a device identifier is present
/// exactly when a real backend was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    pub platform: CapturePlatform,
    pub device: Option<String>,
}

impl DeviceSelection {
    pub fn v4l2(path: impl Into<String>) -> Self {
        Self {
            platform: CapturePlatform::V4l2,
            device: Some(path.into()),
        }
    }

    pub fn avfoundation(index: impl Into<String>) -> Self {
        Self {
            platform: CapturePlatform::AvFoundation,
            device: Some(index.into()),
        }
    }

    pub fn synthetic() -> Self {
        Self {
            platform: CapturePlatform::Synthetic,
            device: None,
        }
    }

    /// True when no physical camera was found and the test pattern is used.
    pub fn is_fallback(&self) -> bool {
        self.device.is_none()
    }
}

/// Probes platform device listings for a recognized camera.
pub struct DeviceDetector {
    detect: DetectConfig,
    tools: ToolsConfig,
}

impl DeviceDetector {
    pub fn new(detect: DetectConfig, tools: ToolsConfig) -> Self {
        Self { detect, tools }
    }

    /// Detect a capture device, falling back to the synthetic source.
    ///
    /// Never fails: missing tooling, an empty listing, or a probing error all
    /// resolve to [`DeviceSelection::synthetic`].
    pub fn detect(&self) -> DeviceSelection {
        let probed = if cfg!(target_os = "macos") {
            self.probe_avfoundation()
        } else {
            self.probe_v4l2()
        };

        match probed {
            Ok(Some(selection)) => {
                info!(
                    "Camera detected: {} ({:?})",
                    selection.device.as_deref().unwrap_or("-"),
                    selection.platform
                );
                selection
            }
            Ok(None) => {
                warn!("No camera detected, falling back to test pattern");
                DeviceSelection::synthetic()
            }
            Err(e) => {
                warn!("Camera detection failed ({e:#}), falling back to test pattern");
                DeviceSelection::synthetic()
            }
        }
    }

    fn probe_v4l2(&self) -> Result<Option<DeviceSelection>> {
        let program = self.tools.v4l2_ctl_program();
        which::which(&program)
            .with_context(|| format!("{} not found", program.display()))?;

        let output = Command::new(&program)
            .arg("--list-devices")
            .output()
            .context("failed to run v4l2-ctl")?;

        if !output.status.success() {
            anyhow::bail!("v4l2-ctl exited with status {}", output.status);
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let pattern = Regex::new(&self.detect.v4l2_pattern)
            .with_context(|| format!("invalid camera pattern: {}", self.detect.v4l2_pattern))?;

        Ok(parse_v4l2_listing(&listing, &pattern).map(DeviceSelection::v4l2))
    }

    fn probe_avfoundation(&self) -> Result<Option<DeviceSelection>> {
        let program = self.tools.ffmpeg_program();
        which::which(&program)
            .with_context(|| format!("{} not found", program.display()))?;

        // ffmpeg prints the device listing on stderr and exits non-zero when
        // invoked with an empty input, so the status is not checked here.
        let output = Command::new(&program)
            .args(["-f", "avfoundation", "-list_devices", "true", "-i", ""])
            .output()
            .context("failed to run ffmpeg device listing")?;

        let listing = String::from_utf8_lossy(&output.stderr);
        Ok(
            parse_avfoundation_listing(&listing, &self.detect.avfoundation_name)
                .map(DeviceSelection::avfoundation),
        )
    }
}

/// Find the first device node grouped under a camera name matching `pattern`.
///
/// `v4l2-ctl --list-devices` prints one unindented name line per device,
/// followed by its indented `/dev/video*` nodes.
pub fn parse_v4l2_listing(listing: &str, pattern: &Regex) -> Option<String> {
    let mut under_match = false;
    for line in listing.lines() {
        if !line.starts_with(char::is_whitespace) {
            under_match = pattern.is_match(line);
            continue;
        }
        if under_match {
            let node = line.trim();
            if node.starts_with("/dev/video") {
                return Some(node.to_string());
            }
        }
    }
    None
}

/// Find the AVFoundation index of the device named `name`.
///
/// Listing lines look like `[AVFoundation indev @ 0x...] [0] FaceTime HD Camera`.
pub fn parse_avfoundation_listing(listing: &str, name: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"\[(\d+)\]\s*{}", regex::escape(name))).ok()?;
    listing
        .lines()
        .find_map(|line| pattern.captures(line))
        .map(|caps| caps[1].to_string())
}
