use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;

use crate::collectors::collector::{CollectionContext, Collector};
use crate::constants::{AMD_DIR, AMD_NOT_SUPPORTED};

/// AMD visualization GPUs. Nothing is gathered yet; the bundle records that.
pub struct AmdCollector;

impl Collector for AmdCollector {
    fn name(&self) -> &'static str {
        "AMD"
    }

    fn subdir(&self) -> &'static str {
        AMD_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        warn!("{} ({})", AMD_NOT_SUPPORTED, ctx.instance.vm_size);
        fs::write(out_dir.join("README.txt"), format!("{}\n", AMD_NOT_SUPPORTED))
            .context("Failed to write AMD placeholder")
    }
}
