mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./camserve.toml",
        "~/.config/camserve/config.toml",
        "/etc/camserve/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.capture.width == 0 || config.capture.height == 0 {
        anyhow::bail!("Capture resolution cannot be 0");
    }

    if config.capture.framerate == 0 {
        anyhow::bail!("Capture framerate cannot be 0");
    }

    if config.capture.segment_seconds == 0 {
        anyhow::bail!("HLS segment duration cannot be 0");
    }

    if config.capture.segment_list_size == 0 {
        anyhow::bail!("HLS segment list size cannot be 0");
    }

    if config.capture.snapshot_interval_secs == 0 {
        anyhow::bail!("Snapshot interval cannot be 0");
    }

    regex::Regex::new(&config.detect.v4l2_pattern)
        .with_context(|| format!("Invalid v4l2 camera pattern: {}", config.detect.v4l2_pattern))?;

    Ok(())
}
