//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a supervisor over a temporary
//! output directory and a full [`AppContext`]. The server constructors bind
//! Axum to a random port for HTTP-level testing. Stub encoder scripts stand
//! in for ffmpeg so the lifecycle tests run without a real encoder.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use camserve::capture::CaptureSupervisor;
use camserve::config::{CaptureMode, Config};
use camserve::device::DeviceSelection;
use camserve::output::OutputArea;
use camserve::server::{create_router, AppContext};

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temporary output directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub supervisor: Arc<CaptureSupervisor>,
    _tmp: TempDir,
}

impl TestHarness {
    /// Default config over a temp directory, pointing the encoder at `program`.
    pub fn base_config(tmp: &TempDir, mode: CaptureMode, program: &str) -> Config {
        let mut config = Config::default();
        config.capture.mode = mode;
        config.capture.output_dir = tmp.path().join("hls");
        config.capture.snapshot_interval_secs = 1;
        config.tools.ffmpeg = Some(PathBuf::from(program));
        config
    }

    /// Create a new harness from a prepared config.
    pub fn with_config(config: Config, tmp: TempDir) -> Self {
        let output = OutputArea::new(config.capture.output_dir.clone());
        let supervisor = Arc::new(CaptureSupervisor::new(
            DeviceSelection::synthetic(),
            config.capture.clone(),
            output,
            config.tools.ffmpeg_program(),
        ));

        let ctx = AppContext {
            supervisor: Arc::clone(&supervisor),
            config: Arc::new(config),
        };

        Self {
            ctx,
            supervisor,
            _tmp: tmp,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(mode: CaptureMode, program: &str) -> (Self, SocketAddr) {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let config = Self::base_config(&tmp, mode, program);
        Self::with_server_config(config, tmp).await
    }

    /// Start an Axum server with a custom config on a random port.
    pub async fn with_server_config(config: Config, tmp: TempDir) -> (Self, SocketAddr) {
        let harness = Self::with_config(config, tmp);
        let addr = harness.spawn_server().await;
        (harness, addr)
    }

    /// Start an Axum server whose encoder is a stub shell script.
    #[cfg(unix)]
    pub async fn with_stub_server(mode: CaptureMode, script_body: &str) -> (Self, SocketAddr) {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let program = write_stub_encoder(tmp.path(), script_body);
        let config = Self::base_config(&tmp, mode, &program.to_string_lossy());
        Self::with_server_config(config, tmp).await
    }

    /// Path to the capture output directory.
    pub fn output_dir(&self) -> PathBuf {
        self.ctx.config.capture.output_dir.clone()
    }

    async fn spawn_server(&self) -> SocketAddr {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }
}

/// Write an executable `#!/bin/sh` script standing in for the encoder.
#[cfg(unix)]
pub fn write_stub_encoder(dir: &std::path::Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("encoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write stub encoder");
    let mut perms = std::fs::metadata(&path)
        .expect("failed to stat stub encoder")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("failed to chmod stub encoder");
    path
}
