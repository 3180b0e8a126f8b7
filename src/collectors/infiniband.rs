use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::collectors::collector::{read_nonempty, run_steps, step, CollectionContext, Collector};
use crate::constants::{IB_EXTENSION_STATUS_PATH, INFINIBAND_DIR, INFINIBAND_SYSFS_PATH, PKEY_INDICES};
use crate::utils::command::CommandSpec;

/// InfiniBand driver extension status, HCA state and partition keys.
pub struct InfinibandCollector;

/// Copy the partition keys of every HCA port 1 into `<out_dir>/<device>/pkeys/`.
///
/// A missing or empty key is logged and skipped. Returns the number of keys copied.
pub fn copy_partition_keys(ctx: &CollectionContext, out_dir: &Path) -> Result<usize> {
    let sysfs = ctx.host_path(INFINIBAND_SYSFS_PATH);
    let entries = match fs::read_dir(&sysfs) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("No InfiniBand devices under {}: {}", sysfs.display(), e);
            return Ok(0);
        }
    };

    let mut devices: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    devices.sort();

    let mut copied = 0;
    for device in devices {
        let source_dir = sysfs.join(&device).join("ports").join("1").join("pkeys");
        let dest_dir = out_dir.join(&device).join("pkeys");
        fs::create_dir_all(&dest_dir)
            .context(format!("Failed to create {}", dest_dir.display()))?;

        for index in PKEY_INDICES {
            match read_nonempty(&source_dir.join(index.to_string())) {
                Ok(key) => {
                    fs::write(dest_dir.join(index.to_string()), key)
                        .context(format!("Failed to write pkey {} for {}", index, device))?;
                    copied += 1;
                }
                Err(e) => warn!("Partition key {} for {} unavailable: {:#}", index, device, e),
            }
        }
    }

    debug!("Copied {} partition keys", copied);
    Ok(copied)
}

impl Collector for InfinibandCollector {
    fn name(&self) -> &'static str {
        "Infiniband"
    }

    fn subdir(&self) -> &'static str {
        INFINIBAND_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        let mut steps = vec![step("extension status", || {
            if !ctx.copy_host_file(IB_EXTENSION_STATUS_PATH, &out_dir.join("ib-vmext-status"))? {
                info!("No InfiniBand driver extension status on this host");
            }
            Ok(())
        })];

        if !ctx.runner.is_installed("ibstat") {
            steps.push(step("ibstat", || {
                warn!("ibstat not found; InfiniBand drivers may not be installed");
                fs::write(
                    out_dir.join("ibstat.txt"),
                    "ibstat not found; InfiniBand drivers may not be installed\n",
                )
                .context("Failed to write ibstat placeholder")
            }));
            return run_steps(self.name(), steps);
        }

        steps.push(step("ibstat", || {
            ctx.capture(CommandSpec::new("ibstat"), &out_dir.join("ibstat.txt"))
                .map(|_| ())
        }));
        steps.push(step("ibv_devinfo", || {
            ctx.capture(
                CommandSpec::new("ibv_devinfo").arg("-v"),
                &out_dir.join("ibv_devinfo.txt"),
            )
            .map(|_| ())
        }));
        steps.push(step("pkeys", || copy_partition_keys(ctx, out_dir).map(|_| ())));
        run_steps(self.name(), steps)
    }
}
