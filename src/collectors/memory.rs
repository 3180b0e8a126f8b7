use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::GzDecoder;
use log::{info, warn};
use walkdir::WalkDir;

use crate::collectors::collector::{CollectionContext, Collector};
use crate::constants::MEMORY_DIR;
use crate::utils::command::CommandSpec;

pub const STREAM_REPORT: &str = "stream.txt";
const STREAM_BINARY: &str = "stream";

/// STREAM memory bandwidth benchmark, pinned per instance size.
pub struct MemoryCollector;

/// Number of CPUs named by a list such as `0-43` or `0,4,8`
pub fn cpu_count(list: &str) -> Result<usize> {
    let mut count = 0;
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().context(format!("Invalid CPU range {}", part))?;
                let end: usize = end.trim().parse().context(format!("Invalid CPU range {}", part))?;
                if end < start {
                    bail!("Invalid CPU range {}", part);
                }
                count += end - start + 1;
            }
            None => {
                part.parse::<usize>().context(format!("Invalid CPU id {}", part))?;
                count += 1;
            }
        }
    }

    if count == 0 {
        bail!("Empty CPU list");
    }
    Ok(count)
}

/// Unpack the benchmark package into `dest` and locate the binary.
fn unpack(package: &[u8], dest: &Path) -> Result<PathBuf> {
    tar::Archive::new(GzDecoder::new(package))
        .unpack(dest)
        .context("Failed to unpack STREAM package")?;

    let binary = WalkDir::new(dest)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == STREAM_BINARY)
        .map(|e| e.into_path())
        .ok_or_else(|| anyhow!("STREAM package does not contain a `{}` binary", STREAM_BINARY))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .context("Failed to make STREAM binary executable")?;
    }

    Ok(binary)
}

impl Collector for MemoryCollector {
    fn name(&self) -> &'static str {
        "Memory"
    }

    fn subdir(&self) -> &'static str {
        MEMORY_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        let report = out_dir.join(STREAM_REPORT);
        let size = &ctx.instance.vm_size;

        // Look the size up before downloading anything
        let Some(affinity) = ctx.settings.stream_affinity_for(size) else {
            info!("STREAM is not configured for instance size '{}'", size);
            fs::write(
                &report,
                format!("STREAM benchmark is not supported on instance size '{}'\n", size),
            )
            .context("Failed to write STREAM report")?;
            return Ok(());
        };

        match self.benchmark(ctx, affinity) {
            Ok(content) => fs::write(&report, content).context("Failed to write STREAM report"),
            Err(e) => {
                fs::write(&report, format!("{:#}\n", e)).context("Failed to write STREAM report")?;
                Err(e)
            }
        }
    }
}

impl MemoryCollector {
    /// Download, unpack and run the benchmark; returns the report contents.
    fn benchmark(&self, ctx: &CollectionContext, affinity: &str) -> Result<Vec<u8>> {
        let size = &ctx.instance.vm_size;
        let threads = cpu_count(affinity)?;

        let url = &ctx.settings.stream_package_url;
        let package = ctx
            .fetcher
            .get(url, &[])
            .context(format!("Failed to download STREAM benchmark from {}", url))?;

        let workdir = ctx.cleanup.scratch_dir("hpcdiag-stream")?;
        let binary = unpack(&package, workdir.path())?;

        let timeout = Duration::from_secs(ctx.settings.stream_timeout_secs);
        info!("Running STREAM with {} threads on CPUs {}", threads, affinity);
        let spec = CommandSpec::new(&binary.to_string_lossy())
            .env("OMP_NUM_THREADS", threads.to_string())
            .env("GOMP_CPU_AFFINITY", affinity)
            .current_dir(workdir.path())
            .timeout(timeout);
        let output = ctx.runner.run(&spec).context("Failed to run STREAM")?;

        let mut content =
            format!("# STREAM on {}: {} threads, CPUs {}\n", size, threads, affinity).into_bytes();
        content.extend_from_slice(&output.stdout);
        if output.timed_out {
            warn!("STREAM timed out after {}s", timeout.as_secs());
            content.extend_from_slice(
                format!("\nSTREAM timed out after {} seconds\n", timeout.as_secs()).as_bytes(),
            );
        } else if !output.success() {
            content.extend_from_slice(
                format!("\nSTREAM exited with {:?}\n{}", output.exit_code, output.stderr_lossy())
                    .as_bytes(),
            );
        }
        Ok(content)
    }
}
