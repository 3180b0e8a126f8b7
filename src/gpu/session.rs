use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use tempfile::TempDir;

use crate::utils::command::{CommandRunner, CommandSpec};

pub const DCGMI: &str = "dcgmi";
pub const HOST_ENGINE: &str = "nv-hostengine";
pub const NVIDIA_SMI: &str = "nvidia-smi";

/// Where a GPU diagnostic session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GpuPhase {
    Idle,
    DaemonStarting,
    PersistenceEnabling,
    DiagRunning,
    PersistenceRestoring,
    DaemonStopping,
}

#[derive(Debug)]
struct SessionState {
    phase: GpuPhase,
    /// `None` until the daemon has been probed
    daemon_already_running: Option<bool>,
    daemon_started: bool,
    /// Devices switched to persistence mode by this session, not yet restored
    snapshot: Vec<u32>,
    restored_devices: Vec<u32>,
    restored: bool,
}

/// Host GPU state touched by one diagnostic pass.
///
/// The daemon ownership flag and the persistence snapshot live here rather
/// than in process globals so that the normal exit path and the interrupt
/// handler restore through the same [`GpuSession::restore`]. State changes
/// happen under the session lock, so a concurrent restore either sees a
/// change fully recorded or runs before it starts; once restored, the
/// session refuses further changes.
pub struct GpuSession {
    runner: Arc<dyn CommandRunner>,
    workdir: PathBuf,
    state: Mutex<SessionState>,
}

impl GpuSession {
    pub fn new(runner: Arc<dyn CommandRunner>, workdir: &Path) -> Self {
        GpuSession {
            runner,
            workdir: workdir.to_path_buf(),
            state: Mutex::new(SessionState {
                phase: GpuPhase::Idle,
                daemon_already_running: None,
                daemon_started: false,
                snapshot: Vec::new(),
                restored_devices: Vec::new(),
                restored: false,
            }),
        }
    }

    // A panic elsewhere must not prevent restoration
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(program).current_dir(&self.workdir)
    }

    fn ensure_active(state: &SessionState) -> Result<()> {
        if state.restored {
            return Err(anyhow!("GPU session was already restored (interrupted?)"));
        }
        Ok(())
    }

    pub fn phase(&self) -> GpuPhase {
        self.lock().phase
    }

    pub fn daemon_already_running(&self) -> Option<bool> {
        self.lock().daemon_already_running
    }

    /// Devices currently held in persistence mode by this session
    pub fn persistence_snapshot(&self) -> Vec<u32> {
        self.lock().snapshot.clone()
    }

    /// Devices whose persistence mode was switched back off by [`restore`](Self::restore)
    pub fn restored_devices(&self) -> Vec<u32> {
        self.lock().restored_devices.clone()
    }

    pub fn is_restored(&self) -> bool {
        self.lock().restored
    }

    /// Probe the DCGM host engine and start it if it isn't running.
    ///
    /// Returns whether it was already running.
    pub fn ensure_daemon(&self) -> Result<bool> {
        let mut state = self.lock();
        Self::ensure_active(&state)?;
        state.phase = GpuPhase::DaemonStarting;

        let probe = self.runner.run(&self.command(DCGMI).args(["discovery", "-l"]));
        let already_running = matches!(&probe, Ok(output) if output.success());
        state.daemon_already_running = Some(already_running);

        if already_running {
            info!("DCGM host engine already running; it will be left running");
            return Ok(true);
        }

        info!("Starting DCGM host engine");
        let started = self
            .runner
            .run(&self.command(HOST_ENGINE).discard_output())
            .map(|output| output.success())
            .unwrap_or(false);
        if !started {
            return Err(anyhow!("Failed to start {}", HOST_ENGINE));
        }
        state.daemon_started = true;
        Ok(false)
    }

    /// Enable persistence mode on `devices`, recording each one before it is
    /// switched so that restoration covers partial progress.
    pub fn enable_persistence(&self, devices: &[u32]) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_active(&state)?;
        state.phase = GpuPhase::PersistenceEnabling;

        for &device in devices {
            if state.snapshot.contains(&device) {
                continue;
            }
            state.snapshot.push(device);

            info!("Enabling persistence mode on GPU {}", device);
            let spec = self
                .command(NVIDIA_SMI)
                .args(["-i".to_string(), device.to_string(), "-pm".to_string(), "1".to_string()]);
            match self.runner.run(&spec) {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(
                    "Enabling persistence mode on GPU {} failed: {}",
                    device,
                    output.stderr_lossy().trim()
                ),
                Err(e) => warn!("Enabling persistence mode on GPU {} failed: {}", device, e),
            }
        }
        Ok(())
    }

    /// Mark the diagnostic pass as started
    pub fn begin_diagnostics(&self) -> Result<()> {
        let mut state = self.lock();
        Self::ensure_active(&state)?;
        state.phase = GpuPhase::DiagRunning;
        Ok(())
    }

    /// Put the host back the way the session found it.
    ///
    /// Disables persistence mode on every snapshotted device and stops the
    /// host engine if this session started it. Safe to call any number of
    /// times from any thread; only the first call does work, and its return
    /// value is `true`.
    pub fn restore(&self) -> bool {
        let mut state = self.lock();
        if state.restored {
            debug!("GPU state already restored");
            return false;
        }

        state.phase = GpuPhase::PersistenceRestoring;
        let devices: Vec<u32> = state.snapshot.drain(..).collect();
        for &device in &devices {
            info!("Disabling persistence mode on GPU {}", device);
            let spec = self
                .command(NVIDIA_SMI)
                .args(["-i".to_string(), device.to_string(), "-pm".to_string(), "0".to_string()]);
            match self.runner.run(&spec) {
                Ok(output) if output.success() => {}
                Ok(output) => warn!(
                    "Disabling persistence mode on GPU {} failed: {}",
                    device,
                    output.stderr_lossy().trim()
                ),
                Err(e) => warn!("Disabling persistence mode on GPU {} failed: {}", device, e),
            }
        }
        state.restored_devices.extend(devices);

        state.phase = GpuPhase::DaemonStopping;
        if state.daemon_started && state.daemon_already_running == Some(false) {
            info!("Stopping DCGM host engine");
            match self.runner.run(&self.command(HOST_ENGINE).arg("-t")) {
                Ok(output) if output.success() => state.daemon_started = false,
                Ok(output) => warn!("Stopping {} failed: {}", HOST_ENGINE, output.stderr_lossy().trim()),
                Err(e) => warn!("Stopping {} failed: {}", HOST_ENGINE, e),
            }
        }

        state.restored = true;
        state.phase = GpuPhase::Idle;
        true
    }
}

/// Holds what an interrupt must undo: the live GPU session, if any, and
/// scratch directories that would otherwise outlive the process.
///
/// The interrupt handler is installed once for the whole run and captures
/// the registry; the GPU sub-orchestrator registers its session for the
/// duration of the pass.
#[derive(Default)]
pub struct CleanupRegistry {
    session: Mutex<Option<Arc<GpuSession>>>,
    scratch: Mutex<Vec<PathBuf>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<GpuSession>>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scratch_paths(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.scratch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, session: Arc<GpuSession>) {
        *self.slot() = Some(session);
    }

    pub fn unregister(&self) {
        self.slot().take();
    }

    pub fn has_session(&self) -> bool {
        self.slot().is_some()
    }

    /// Create a temporary directory that is removed when dropped or when the
    /// run is interrupted, whichever comes first.
    pub fn scratch_dir(&self, prefix: &str) -> Result<ScratchDir<'_>> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .context(format!("Failed to create {} scratch directory", prefix))?;
        self.scratch_paths().push(dir.path().to_path_buf());
        Ok(ScratchDir {
            dir: Some(dir),
            registry: self,
        })
    }

    /// Scratch directories currently alive
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        self.scratch_paths().clone()
    }

    fn release_scratch(&self, path: &Path) {
        self.scratch_paths().retain(|p| p != path);
    }

    /// Restore the registered session, if any, and remove live scratch
    /// directories. Idempotent. Returns whether a GPU session was restored.
    pub fn restore_all(&self) -> bool {
        // Don't hold the registry lock while the session runs commands
        let session = self.slot().clone();
        let restored = match session {
            Some(session) => {
                info!("Restoring GPU state (pass was in {:?})", session.phase());
                session.restore()
            }
            None => false,
        };

        let paths: Vec<PathBuf> = self.scratch_paths().drain(..).collect();
        for path in paths {
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!("Removed scratch directory {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        restored
    }
}

/// A temporary directory tracked by a [`CleanupRegistry`].
pub struct ScratchDir<'a> {
    dir: Option<TempDir>,
    registry: &'a CleanupRegistry,
}

impl ScratchDir<'_> {
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }
}

impl Drop for ScratchDir<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.registry.release_scratch(dir.path());
            if let Err(e) = dir.close() {
                debug!("Scratch directory already gone: {}", e);
            }
        }
    }
}

/// Restores the session and clears the registry when dropped, so a pass that
/// returns early or panics still leaves the host as it found it.
pub struct RestoreGuard<'a> {
    session: Arc<GpuSession>,
    registry: &'a CleanupRegistry,
}

impl<'a> RestoreGuard<'a> {
    pub fn new(session: Arc<GpuSession>, registry: &'a CleanupRegistry) -> Self {
        registry.register(Arc::clone(&session));
        RestoreGuard { session, registry }
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.session.restore();
        self.registry.unregister();
    }
}
