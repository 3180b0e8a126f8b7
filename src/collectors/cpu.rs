use std::path::Path;

use anyhow::Result;

use crate::collectors::collector::{CollectionContext, Collector};
use crate::constants::CPU_DIR;
use crate::utils::command::CommandSpec;

pub struct CpuCollector;

impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn subdir(&self) -> &'static str {
        CPU_DIR
    }

    fn collect(&self, ctx: &CollectionContext, out_dir: &Path) -> Result<()> {
        ctx.capture(CommandSpec::new("lscpu"), &out_dir.join("lscpu.txt"))?;
        Ok(())
    }
}
