use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};

use crate::classify::Capabilities;
use crate::config::{RunConfig, Settings};
use crate::gpu::CleanupRegistry;
use crate::metadata::InstanceDescriptor;
use crate::models::{CollectorOutcome, CollectorStatus};
use crate::utils::command::{CommandRunner, CommandSpec};
use crate::utils::fallback::{FallbackChain, Resolution};
use crate::utils::fetch::HttpFetcher;

/// Everything a collector may read or use during its execution window.
pub struct CollectionContext {
    pub runner: Arc<dyn CommandRunner>,
    pub fetcher: Arc<dyn HttpFetcher>,
    pub settings: Settings,
    pub config: RunConfig,
    pub instance: InstanceDescriptor,
    pub capabilities: Capabilities,
    pub cleanup: Arc<CleanupRegistry>,
}

impl CollectionContext {
    /// Resolve a host path under the configured sysroot
    pub fn host_path(&self, relative: &str) -> PathBuf {
        self.settings.host_path(relative)
    }

    /// Run a tool and return its stdout, treating a missing tool or a
    /// non-zero exit as an error.
    pub fn command_stdout(&self, spec: &CommandSpec) -> Result<Vec<u8>> {
        command_stdout(self.runner.as_ref(), spec)
    }

    /// Save a tool's output to `dest`, or an explanatory note when the tool
    /// is missing or fails.
    pub fn capture(&self, spec: CommandSpec, dest: &Path) -> Result<Resolution> {
        let placeholder = format!("`{}` is not available or failed on this host", spec.display());
        FallbackChain::new("command output")
            .then("command", || self.command_stdout(&spec))
            .write_to(dest, &placeholder)
    }

    /// Copy a host file into the bundle if it exists. Returns whether it was copied.
    pub fn copy_host_file(&self, relative: &str, dest: &Path) -> Result<bool> {
        let source = self.host_path(relative);
        if !source.is_file() {
            debug!("{} not present, skipping", source.display());
            return Ok(false);
        }
        fs::copy(&source, dest)
            .context(format!("Failed to copy {} to {}", source.display(), dest.display()))?;
        Ok(true)
    }
}

/// Run `spec` through `runner` and return stdout on success.
pub fn command_stdout(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<Vec<u8>> {
    if !runner.is_installed(&spec.program) {
        return Err(anyhow!("{} is not installed", spec.program));
    }
    let output = runner.run(spec)?;
    if output.timed_out {
        return Err(anyhow!("{} timed out", spec.display()));
    }
    if !output.success() {
        return Err(anyhow!(
            "{} exited with {:?}: {}",
            spec.display(),
            output.exit_code,
            output.stderr_lossy().trim()
        ));
    }
    Ok(output.stdout)
}

/// Read a file, treating a missing or empty file as an error
pub fn read_nonempty(path: &Path) -> Result<Vec<u8>> {
    let content = fs::read(path).context(format!("Failed to read {}", path.display()))?;
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(anyhow!("{} is empty", path.display()));
    }
    Ok(content)
}

/// One diagnostic category, writing into its own bundle subdirectory.
pub trait Collector {
    fn name(&self) -> &'static str;

    /// Subdirectory of the bundle this collector owns
    fn subdir(&self) -> &'static str;

    /// Gather artifacts into `out_dir`, which already exists.
    ///
    /// Individual steps degrade to placeholder files; an `Err` here means
    /// the collector as a whole could not do its job.
    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()>;
}

/// A named step within a collector
pub type Step<'a> = (&'static str, Box<dyn FnOnce() -> Result<()> + 'a>);

pub fn step<'a>(name: &'static str, f: impl FnOnce() -> Result<()> + 'a) -> Step<'a> {
    (name, Box::new(f))
}

/// Run every step even if earlier ones fail; report all failures at the end.
pub fn run_steps(collector: &str, steps: Vec<Step<'_>>) -> Result<()> {
    let mut failed = Vec::new();
    for (name, step) in steps {
        debug!("{}: {}", collector, name);
        if let Err(e) = step() {
            warn!("{}: step '{}' failed: {:#}", collector, name, e);
            failed.push(name);
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} step(s) failed: {}", failed.len(), failed.join(", ")))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one collector so that nothing it does (error or panic) escapes.
pub fn run_isolated(
    collector: &dyn Collector,
    ctx: &CollectionContext,
    bundle_dir: &Path,
) -> CollectorOutcome {
    let start = Instant::now();
    let out_dir = bundle_dir.join(collector.subdir());
    info!("Running {} collector", collector.name());

    let result = fs::create_dir_all(&out_dir)
        .context(format!("Failed to create {}", out_dir.display()))
        .and_then(|_| {
            panic::catch_unwind(AssertUnwindSafe(|| collector.collect(ctx, &out_dir)))
                .unwrap_or_else(|payload| {
                    Err(anyhow!("collector panicked: {}", panic_message(payload)))
                })
        });

    let duration_ms = start.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            info!("{} collector completed in {} ms", collector.name(), duration_ms);
            CollectorOutcome {
                name: collector.name().to_string(),
                status: CollectorStatus::Completed,
                error: None,
                duration_ms,
            }
        }
        Err(e) => {
            warn!("{} collector failed: {:#}", collector.name(), e);
            warn!("Continuing with remaining collectors");
            CollectorOutcome {
                name: collector.name().to_string(),
                status: CollectorStatus::Failed,
                error: Some(format!("{:#}", e)),
                duration_ms,
            }
        }
    }
}
