//! Error taxonomy of the capture supervisor.

use std::io;

/// Errors surfaced by supervisor operations.
///
/// State-machine rejections ([`AlreadyRunning`](CaptureError::AlreadyRunning),
/// [`NotRunning`](CaptureError::NotRunning)) carry stable messages that the
/// HTTP layer returns verbatim; the remaining variants abort a `start()`
/// attempt and leave the supervisor faulted.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// `start()` was called while a run is active, starting, or faulted.
    #[error("already running")]
    AlreadyRunning,

    /// `stop()` was called with no active run.
    #[error("not running")]
    NotRunning,

    /// The output directory could not be prepared for a fresh run.
    #[error("failed to prepare output directory: {0}")]
    OutputArea(#[source] io::Error),

    /// The encoder process could not be created.
    #[error("failed to spawn encoder: {0}")]
    Spawn(#[source] io::Error),
}

impl CaptureError {
    /// True for state-machine rejections answered as client errors.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            CaptureError::AlreadyRunning | CaptureError::NotRunning
        )
    }
}
