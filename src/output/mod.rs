//! Output directory lifecycle.
//!
//! One directory holds everything a capture run produces: HLS segments plus
//! manifest in stream mode, the published snapshot in snapshot mode. The
//! [`OutputArea`] owns that directory's contents: it clears stale artifacts
//! before a run starts and performs the rename that makes a finished artifact
//! externally visible.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::CaptureMode;

/// HLS manifest file name referenced by the player page.
pub const MANIFEST_NAME: &str = "index.m3u8";
/// Segment file template; `%d` is expanded by the encoder per segment.
pub const SEGMENT_TEMPLATE: &str = "segment_%d.ts";
/// Published snapshot name served by `GET /image`.
pub const SNAPSHOT_NAME: &str = "latest.jpg";
/// In-progress snapshot written by the encoder before publication.
pub const SNAPSHOT_TEMP_NAME: &str = "latest_tmp.jpg";

/// Owns the artifact directory of the capture pipeline.
#[derive(Debug, Clone)]
pub struct OutputArea {
    dir: PathBuf,
}

impl OutputArea {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_NAME)
    }

    pub fn segment_template(&self) -> PathBuf {
        self.dir.join(SEGMENT_TEMPLATE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_NAME)
    }

    pub fn snapshot_temp_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_TEMP_NAME)
    }

    /// Prepare the directory for a fresh run.
    ///
    /// Creates the directory if absent and removes every prior artifact
    /// matching the mode's file pattern. A file that cannot be removed aborts
    /// the reset: starting over stale output would mix artifacts of two runs.
    pub fn reset(&self, mode: CaptureMode) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let stale = match mode {
                CaptureMode::Stream => name.ends_with(".ts") || name.ends_with(".m3u8"),
                CaptureMode::Snapshot => name.ends_with(".jpg"),
            };
            if stale {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(())
    }

    /// Atomically publish a fully written temporary artifact.
    ///
    /// The rename guarantees a concurrent reader of `target` sees either the
    /// previous complete file or the new one, never a partial write.
    pub fn publish(&self, temp: &Path, target: &Path) -> io::Result<()> {
        fs::rename(temp, target)
    }
}
