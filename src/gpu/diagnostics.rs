use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::config::{GpuLevel, GpuTimeouts};
use crate::gpu::report::devices_lacking_persistence;
use crate::gpu::session::{CleanupRegistry, GpuSession, RestoreGuard, DCGMI};
use crate::utils::command::{CommandOutput, CommandRunner, CommandSpec};

pub const PERSISTENCE_CHECK_LOG: &str = "dcgm-persistence-check.log";

/// What a diagnostic pass did to the host, for the collection summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuDiagOutcome {
    pub level: GpuLevel,
    pub daemon_already_running: bool,
    pub persistence_enabled: Vec<u32>,
    pub timed_out: bool,
}

/// Log file name for a diagnostic pass at `level`
pub fn diag_log_name(level: GpuLevel) -> String {
    format!("dcgm-diag-{}.log", level.run_level())
}

fn diag_command(workdir: &Path, level: GpuLevel, timeout: Duration) -> CommandSpec {
    CommandSpec::new(DCGMI)
        .args(["diag", "-r"])
        .arg(level.run_level().to_string())
        .current_dir(workdir)
        .timeout(timeout)
}

fn render(output: &CommandOutput) -> Vec<u8> {
    let mut content = output.stdout.clone();
    if !output.stderr.is_empty() {
        content.extend_from_slice(b"\n--- stderr ---\n");
        content.extend_from_slice(&output.stderr);
    }
    content
}

/// Run a DCGM diagnostic pass at `level`, writing reports into `out_dir`.
///
/// The host engine is started if needed and devices lacking persistence mode
/// are switched on for the pass. Whatever happens (error, timeout, panic or
/// an interrupt restoring through `registry`), the host is put back the way
/// it was found before this returns. A timeout is recorded in the report
/// and is not an error.
pub fn run_gpu_diagnostics(
    runner: Arc<dyn CommandRunner>,
    registry: &CleanupRegistry,
    out_dir: &Path,
    level: GpuLevel,
    timeouts: &GpuTimeouts,
) -> Result<GpuDiagOutcome> {
    info!("Running DCGM diagnostics at level {} ({})", level.run_level(), level);

    let session = Arc::new(GpuSession::new(Arc::clone(&runner), out_dir));
    let _guard = RestoreGuard::new(Arc::clone(&session), registry);

    let daemon_already_running = session.ensure_daemon()?;

    // The fastest pass reports which devices lack persistence mode
    let check = diag_command(out_dir, GpuLevel::Quick, timeouts.for_level(GpuLevel::Quick));
    let lacking = match runner.run(&check) {
        Ok(output) => {
            fs::write(out_dir.join(PERSISTENCE_CHECK_LOG), render(&output))
                .context("Failed to write persistence check report")?;
            devices_lacking_persistence(&output.stdout_lossy())
        }
        Err(e) => {
            warn!("Persistence check failed: {:#}", e);
            Vec::new()
        }
    };
    if lacking.is_empty() {
        info!("All GPUs already have persistence mode enabled");
    }
    session.enable_persistence(&lacking)?;

    session.begin_diagnostics()?;
    let timeout = timeouts.for_level(level);
    let output = runner
        .run(&diag_command(out_dir, level, timeout))
        .context("Failed to run dcgmi diag")?;

    let mut report = render(&output);
    if output.timed_out {
        warn!("DCGM diagnostics timed out after {}s", timeout.as_secs());
        report.extend_from_slice(
            format!(
                "\nDiagnostic run timed out after {} seconds (level {})\n",
                timeout.as_secs(),
                level.run_level()
            )
            .as_bytes(),
        );
    }
    fs::write(out_dir.join(diag_log_name(level)), report)
        .context("Failed to write DCGM diagnostic report")?;

    Ok(GpuDiagOutcome {
        level,
        daemon_already_running,
        persistence_enabled: lacking,
        timed_out: output.timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fake_gpu::FakeGpuHost;
    use tempfile::TempDir;

    fn short_timeouts() -> GpuTimeouts {
        GpuTimeouts {
            quick_secs: 1,
            standard_secs: 2,
            extended_secs: 3,
        }
    }

    #[test]
    fn test_one_of_three_devices_toggled_on_then_off() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(FakeGpuHost::new(3, &[1]));
        let registry = CleanupRegistry::new();

        let outcome = run_gpu_diagnostics(
            host.clone(),
            &registry,
            dir.path(),
            GpuLevel::Standard,
            &short_timeouts(),
        )
        .unwrap();

        assert_eq!(outcome.persistence_enabled, vec![1]);
        assert!(!outcome.daemon_already_running);
        assert!(!outcome.timed_out);
        assert_eq!(host.toggles(), vec![(1, true), (1, false)]);
        assert_eq!(host.persistence(), vec![true, false, true]);
        assert!(!host.daemon_running());
        assert!(!registry.has_session());

        assert!(dir.path().join(PERSISTENCE_CHECK_LOG).exists());
        let report = fs::read_to_string(dir.path().join("dcgm-diag-2.log")).unwrap();
        assert!(report.contains("Persistence Mode"));
    }

    #[test]
    fn test_running_daemon_stays_running() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(FakeGpuHost::new(2, &[0]).with_daemon_running());
        let registry = CleanupRegistry::new();

        let outcome = run_gpu_diagnostics(
            host.clone(),
            &registry,
            dir.path(),
            GpuLevel::Quick,
            &short_timeouts(),
        )
        .unwrap();

        assert!(outcome.daemon_already_running);
        assert!(host.daemon_running());
        assert_eq!(host.persistence(), vec![false, true]);
    }

    #[test]
    fn test_timeout_is_recorded_and_state_restored() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(FakeGpuHost::new(3, &[0, 2]).with_hanging_diagnostics());
        let registry = CleanupRegistry::new();

        let outcome = run_gpu_diagnostics(
            host.clone(),
            &registry,
            dir.path(),
            GpuLevel::Extended,
            &short_timeouts(),
        )
        .unwrap();

        assert!(outcome.timed_out);
        let report = fs::read_to_string(dir.path().join("dcgm-diag-3.log")).unwrap();
        assert!(report.contains("timed out after 3 seconds"));
        assert_eq!(host.persistence(), vec![false, true, false]);
        assert!(!host.daemon_running());
    }

    #[test]
    fn test_interrupt_mid_run_restores_once() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(FakeGpuHost::new(3, &[1]));
        let registry = Arc::new(CleanupRegistry::new());
        host.interrupt_during_diag(Arc::clone(&registry));

        let result = run_gpu_diagnostics(
            host.clone(),
            &registry,
            dir.path(),
            GpuLevel::Quick,
            &short_timeouts(),
        );

        assert!(result.is_ok());
        // The interrupt restored everything; the normal exit path must not repeat it
        assert_eq!(host.toggles(), vec![(1, true), (1, false)]);
        assert_eq!(
            host.calls().iter().filter(|c| *c == "nv-hostengine -t").count(),
            1
        );
        assert!(!host.daemon_running());
        assert_eq!(host.persistence(), vec![true, false, true]);
    }

    #[test]
    fn test_daemon_start_failure_is_an_error_without_changes() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(FakeGpuHost::new(2, &[0]).without_tool("nv-hostengine"));
        let registry = CleanupRegistry::new();

        let result = run_gpu_diagnostics(
            host.clone(),
            &registry,
            dir.path(),
            GpuLevel::Quick,
            &short_timeouts(),
        );

        assert!(result.is_err());
        assert!(host.toggles().is_empty());
        assert!(!registry.has_session());
    }
}
