//! Capture run supervisor.
//!
//! At most one capture run exists system-wide. The run state lives behind a
//! single mutex, so concurrent `start`/`stop` requests observe an in-flight
//! transition and are rejected instead of racing a second process into
//! existence. Process exits are observed asynchronously by a monitor task
//! and folded back into the state machine; stale handles never linger.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::capture::CaptureError;
use crate::config::{CaptureConfig, CaptureMode};
use crate::device::DeviceSelection;
use crate::encoder;
use crate::output::OutputArea;

/// Externally visible status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
    Capturing,
    Faulted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Capturing => "capturing",
            RunStatus::Faulted => "faulted",
        }
    }
}

/// Handle to the active run.
enum RunHandle {
    /// Long-lived encoder process, terminated through the monitor task.
    Encoder {
        generation: u64,
        shutdown: oneshot::Sender<()>,
    },
    /// Recurring snapshot task.
    Loop {
        task: tokio::task::JoinHandle<()>,
        stop: Arc<AtomicBool>,
    },
}

enum RunState {
    Idle,
    Starting,
    Running(RunHandle),
    Stopping { generation: u64 },
    Faulted { reason: String },
}

/// Owns the lifecycle of the capture run.
pub struct CaptureSupervisor {
    selection: DeviceSelection,
    capture: CaptureConfig,
    output: OutputArea,
    program: PathBuf,
    state: Mutex<RunState>,
    frames: AtomicU64,
    generation: AtomicU64,
    status_tx: watch::Sender<RunStatus>,
}

impl CaptureSupervisor {
    pub fn new(
        selection: DeviceSelection,
        capture: CaptureConfig,
        output: OutputArea,
        program: PathBuf,
    ) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Stopped);
        Self {
            selection,
            capture,
            output,
            program,
            state: Mutex::new(RunState::Idle),
            frames: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            status_tx,
        }
    }

    pub fn output(&self) -> &OutputArea {
        &self.output
    }

    /// Number of snapshot attempts since the current run started.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Current status, collapsed to the external vocabulary.
    pub fn status(&self) -> RunStatus {
        let state = self.state.lock();
        self.status_of(&state)
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status_tx.subscribe()
    }

    /// Bounded wait until the status equals `target`.
    pub async fn wait_for(&self, target: RunStatus, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        tokio::time::timeout(timeout, async {
            while *rx.borrow_and_update() != target {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    fn status_of(&self, state: &RunState) -> RunStatus {
        match state {
            RunState::Idle | RunState::Stopping { .. } => RunStatus::Stopped,
            RunState::Starting | RunState::Running(_) => match self.capture.mode {
                CaptureMode::Stream => RunStatus::Running,
                CaptureMode::Snapshot => RunStatus::Capturing,
            },
            RunState::Faulted { .. } => RunStatus::Faulted,
        }
    }

    fn set_state(&self, state: &mut RunState, next: RunState) {
        *state = next;
        self.status_tx.send_replace(self.status_of(state));
    }

    fn fault(&self, reason: String) {
        let mut state = self.state.lock();
        self.set_state(&mut state, RunState::Faulted { reason });
    }

    /// Begin a capture run.
    ///
    /// Only valid from idle. Resets the output area, then spawns the encoder
    /// process (stream mode) or schedules the snapshot loop (snapshot mode).
    /// Any failure along the way leaves the supervisor faulted without a
    /// stray process behind.
    pub fn start(self: &Arc<Self>) -> Result<(), CaptureError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, RunState::Idle) {
                return Err(CaptureError::AlreadyRunning);
            }
            self.set_state(&mut state, RunState::Starting);
        }

        if let Err(e) = self.output.reset(self.capture.mode) {
            error!("Failed to reset output directory: {}", e);
            self.fault(e.to_string());
            return Err(CaptureError::OutputArea(e));
        }

        match self.capture.mode {
            CaptureMode::Stream => self.start_encoder(),
            CaptureMode::Snapshot => {
                self.start_snapshot_loop();
                Ok(())
            }
        }
    }

    /// End the current run.
    ///
    /// Stream mode signals the encoder and returns immediately; idle follows
    /// once the exit notification arrives. Snapshot mode cancels the
    /// recurring task synchronously. From a faulted state this acknowledges
    /// the fault and returns to idle.
    pub fn stop(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, RunState::Idle) {
            RunState::Running(RunHandle::Encoder {
                generation,
                shutdown,
            }) => {
                let _ = shutdown.send(());
                self.set_state(&mut state, RunState::Stopping { generation });
                info!("Stop requested, signalling encoder");
                Ok(())
            }
            RunState::Running(RunHandle::Loop { task, stop }) => {
                stop.store(true, Ordering::Relaxed);
                task.abort();
                self.set_state(&mut state, RunState::Idle);
                info!("Snapshot capture stopped");
                Ok(())
            }
            RunState::Faulted { reason } => {
                info!("Fault acknowledged: {}", reason);
                self.set_state(&mut state, RunState::Idle);
                Ok(())
            }
            other => {
                *state = other;
                Err(CaptureError::NotRunning)
            }
        }
    }

    fn start_encoder(self: &Arc<Self>) -> Result<(), CaptureError> {
        let args = encoder::stream_args(&self.selection, &self.capture, &self.output);
        debug!("Encoder args: {:?}", args);

        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {}: {}", self.program.display(), e);
                self.fault(e.to_string());
                return Err(CaptureError::Spawn(e));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = child.id();

        // Encoder diagnostics go to the log only; they are never parsed for
        // control decisions.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "camserve::encoder", "{}", line);
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Publish the running state before the monitor task can observe an
        // exit, so the notification always finds the matching generation.
        {
            let mut state = self.state.lock();
            self.set_state(
                &mut state,
                RunState::Running(RunHandle::Encoder {
                    generation,
                    shutdown: shutdown_tx,
                }),
            );
        }

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor
                .monitor_encoder(child, shutdown_rx, generation)
                .await;
        });

        info!("Encoder started (pid {:?})", pid);
        Ok(())
    }

    async fn monitor_encoder(
        self: Arc<Self>,
        mut child: Child,
        mut shutdown: oneshot::Receiver<()>,
        generation: u64,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut shutdown => {
                terminate(&mut child);
                child.wait().await
            }
        };

        match status {
            Ok(status) => self.on_encoder_exit(generation, Some(status)),
            Err(e) => {
                error!("Failed to await encoder exit: {}", e);
                self.on_encoder_exit(generation, None);
            }
        }
    }

    /// Fold an observed process exit back into the state machine.
    fn on_encoder_exit(&self, generation: u64, status: Option<ExitStatus>) {
        let mut state = self.state.lock();

        let current = match &*state {
            RunState::Running(RunHandle::Encoder { generation: g, .. }) => *g == generation,
            RunState::Stopping { generation: g } => *g == generation,
            _ => false,
        };
        if !current {
            debug!("Ignoring exit notification from a previous encoder run");
            return;
        }

        if matches!(*state, RunState::Stopping { .. }) {
            // The termination was requested; the exit code does not matter.
            info!("Encoder stopped");
            self.set_state(&mut state, RunState::Idle);
            return;
        }

        match status {
            Some(s) if s.success() => {
                info!("Encoder exited cleanly");
                self.set_state(&mut state, RunState::Idle);
            }
            Some(s) => {
                let reason = format!("encoder exited unexpectedly with {}", s);
                warn!("{}", reason);
                self.set_state(&mut state, RunState::Faulted { reason });
            }
            None => {
                self.set_state(
                    &mut state,
                    RunState::Faulted {
                        reason: "encoder exit status unavailable".to_string(),
                    },
                );
            }
        }
    }

    fn start_snapshot_loop(self: &Arc<Self>) {
        self.frames.store(0, Ordering::Relaxed);

        let stop = Arc::new(AtomicBool::new(false));
        let supervisor = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let task = tokio::spawn(async move {
            supervisor.run_snapshot_loop(flag).await;
        });

        let mut state = self.state.lock();
        self.set_state(&mut state, RunState::Running(RunHandle::Loop { task, stop }));
        info!(
            "Snapshot capture started (every {}s)",
            self.capture.snapshot_interval_secs
        );
    }

    async fn run_snapshot_loop(self: Arc<Self>, stop: Arc<AtomicBool>) {
        let mut interval = tokio::time::interval(self.capture.snapshot_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if stop.load(Ordering::Relaxed) {
                break;
            }
            // The counter advances per attempt; a failed tick is logged and
            // skipped without stopping the schedule.
            let frame = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
            if let Err(e) = self.capture_frame(frame).await {
                warn!("Snapshot {} failed: {:#}", frame, e);
            }
        }
    }

    async fn capture_frame(&self, frame: u64) -> anyhow::Result<()> {
        let temp = self.output.snapshot_temp_path();
        let args = encoder::snapshot_args(&self.selection, &self.capture, &temp, frame);
        debug!("Snapshot encoder args: {:?}", args);

        // kill_on_drop: cancelling the loop mid-tick must not orphan the
        // per-frame encoder invocation.
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("failed to run encoder")?;

        if !output.status.success() {
            let diag = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "encoder exited with {}: {}",
                output.status,
                diag.lines().last().unwrap_or("")
            );
        }

        self.output
            .publish(&temp, &self.output.snapshot_path())
            .context("failed to publish snapshot")?;
        debug!("Published frame {}", frame);
        Ok(())
    }
}

/// Ask the encoder to shut down.
///
/// SIGINT lets ffmpeg finalize the manifest before exiting; a hard kill is
/// the fallback when no pid is available or signals are not supported.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn supervisor(mode: CaptureMode, program: &str) -> (tempfile::TempDir, Arc<CaptureSupervisor>) {
        let tmp = tempfile::tempdir().unwrap();
        let mut capture = CaptureConfig::default();
        capture.mode = mode;
        capture.output_dir = tmp.path().join("hls");
        capture.snapshot_interval_secs = 1;
        let output = OutputArea::new(capture.output_dir.clone());
        let sup = Arc::new(CaptureSupervisor::new(
            DeviceSelection::synthetic(),
            capture,
            output,
            PathBuf::from(program),
        ));
        (tmp, sup)
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let (_tmp, sup) = supervisor(CaptureMode::Stream, "ffmpeg");
        assert_matches!(sup.stop(), Err(CaptureError::NotRunning));
        assert_eq!(sup.status(), RunStatus::Stopped);
    }

    #[tokio::test]
    async fn start_with_missing_encoder_faults() {
        let (_tmp, sup) = supervisor(CaptureMode::Stream, "/nonexistent/encoder-xyz");

        assert_matches!(sup.start(), Err(CaptureError::Spawn(_)));
        assert_eq!(sup.status(), RunStatus::Faulted);

        // Start is only legal from idle.
        assert_matches!(sup.start(), Err(CaptureError::AlreadyRunning));

        // Stop acknowledges the fault, after which stop is "not running".
        assert_matches!(sup.stop(), Ok(()));
        assert_eq!(sup.status(), RunStatus::Stopped);
        assert_matches!(sup.stop(), Err(CaptureError::NotRunning));
    }

    #[tokio::test]
    async fn unwritable_output_area_aborts_start() {
        let tmp = tempfile::tempdir().unwrap();
        // A plain file where the output directory should be.
        let blocked = tmp.path().join("hls");
        std::fs::write(&blocked, b"x").unwrap();

        let mut capture = CaptureConfig::default();
        capture.output_dir = blocked.clone();
        let sup = Arc::new(CaptureSupervisor::new(
            DeviceSelection::synthetic(),
            capture,
            OutputArea::new(blocked),
            PathBuf::from("ffmpeg"),
        ));

        assert_matches!(sup.start(), Err(CaptureError::OutputArea(_)));
        assert_eq!(sup.status(), RunStatus::Faulted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn snapshot_loop_counts_attempts_and_survives_tick_failures() {
        // /bin/true accepts any arguments and produces no snapshot file, so
        // every tick "succeeds" as a process but fails to publish.
        let (_tmp, sup) = supervisor(CaptureMode::Snapshot, "/bin/true");

        sup.start().unwrap();
        assert_eq!(sup.status(), RunStatus::Capturing);
        assert_matches!(sup.start(), Err(CaptureError::AlreadyRunning));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while sup.frames() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(sup.frames() >= 2, "loop did not keep ticking after failures");
        assert_eq!(sup.status(), RunStatus::Capturing);

        sup.stop().unwrap();
        assert_eq!(sup.status(), RunStatus::Stopped);
        assert_matches!(sup.stop(), Err(CaptureError::NotRunning));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stream_crash_is_observed_as_fault() {
        // /bin/false exits non-zero immediately: a successful spawn followed
        // by an abnormal termination.
        let (_tmp, sup) = supervisor(CaptureMode::Stream, "/bin/false");

        sup.start().unwrap();
        assert!(
            sup.wait_for(RunStatus::Faulted, Duration::from_secs(5)).await,
            "crash was not observed"
        );

        sup.stop().unwrap();
        assert_eq!(sup.status(), RunStatus::Stopped);
    }
}
