use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{info, warn};

use crate::collectors::collector::{run_steps, step, CollectionContext, Collector};
use crate::constants::{NVIDIA_DIR, NVIDIA_EXTENSION_STATUS_PATH};
use crate::gpu::diagnostics::diag_log_name;
use crate::gpu::run_gpu_diagnostics;
use crate::gpu::session::{DCGMI, NVIDIA_SMI};
use crate::utils::command::CommandSpec;

const DEBUGDUMP: &str = "nvidia-debugdump";
const DEBUGDUMP_ARCHIVE: &str = "nvidia-debugdump.zip";
const DEBUGDUMP_NOTE: &str = "nvidia-debugdump.txt";

/// NVIDIA driver extension status, device queries and the DCGM diagnostic pass.
pub struct NvidiaCollector;

impl NvidiaCollector {
    fn debug_dump(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        if !ctx.runner.is_installed(DEBUGDUMP) {
            info!("{} not installed, skipping", DEBUGDUMP);
            fs::write(
                out_dir.join(DEBUGDUMP_NOTE),
                format!("{} not found; no debug dump was taken\n", DEBUGDUMP),
            )
            .context("Failed to write debugdump placeholder")?;
            return Ok(());
        }
        let archive = out_dir.join(DEBUGDUMP_ARCHIVE);
        let spec = CommandSpec::new(DEBUGDUMP)
            .arg("--dumpall")
            .arg("--file")
            .arg(archive.to_string_lossy())
            .current_dir(out_dir);
        let output = ctx.runner.run(&spec)?;
        if !output.success() {
            return Err(anyhow!(
                "{} exited with {:?}: {}",
                DEBUGDUMP,
                output.exit_code,
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }

    fn diagnostics(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        if !ctx.runner.is_installed(DCGMI) {
            warn!("{} not installed; skipping DCGM diagnostics", DCGMI);
            fs::write(
                out_dir.join(diag_log_name(ctx.config.gpu_level)),
                format!("{} not found; DCGM diagnostics were not run\n", DCGMI),
            )
            .context("Failed to write DCGM placeholder")?;
            return Ok(());
        }

        let result = run_gpu_diagnostics(
            ctx.runner.clone(),
            &ctx.cleanup,
            out_dir,
            ctx.config.gpu_level,
            &ctx.settings.gpu_timeouts,
        );
        match result {
            Ok(outcome) => {
                info!(
                    "DCGM diagnostics finished (timed out: {}, persistence toggled on {:?})",
                    outcome.timed_out, outcome.persistence_enabled
                );
                Ok(())
            }
            Err(e) => {
                let log = out_dir.join(diag_log_name(ctx.config.gpu_level));
                if !log.exists() {
                    fs::write(&log, format!("DCGM diagnostics failed: {:#}\n", e))
                        .context("Failed to write DCGM failure note")?;
                }
                Err(e)
            }
        }
    }
}

impl Collector for NvidiaCollector {
    fn name(&self) -> &'static str {
        "Nvidia"
    }

    fn subdir(&self) -> &'static str {
        NVIDIA_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        let mut steps = vec![step("extension status", || {
            if !ctx.copy_host_file(NVIDIA_EXTENSION_STATUS_PATH, &out_dir.join("nvidia-vmext-status"))? {
                info!("No NVIDIA driver extension status on this host");
            }
            Ok(())
        })];

        if !ctx.runner.is_installed(NVIDIA_SMI) {
            steps.push(step("nvidia-smi", || {
                warn!("{} not found; NVIDIA drivers may not be installed", NVIDIA_SMI);
                fs::write(
                    out_dir.join("nvidia-smi-q.out"),
                    format!("{} not found; NVIDIA drivers may not be installed\n", NVIDIA_SMI),
                )
                .context("Failed to write nvidia-smi placeholder")
            }));
            return run_steps(self.name(), steps);
        }

        steps.push(step("nvidia-smi", || {
            ctx.capture(
                CommandSpec::new(NVIDIA_SMI).arg("-q").current_dir(out_dir),
                &out_dir.join("nvidia-smi-q.out"),
            )
            .map(|_| ())
        }));
        steps.push(step("debugdump", || self.debug_dump(ctx, out_dir)));
        steps.push(step("dcgm", || self.diagnostics(ctx, out_dir)));
        run_steps(self.name(), steps)
    }
}
