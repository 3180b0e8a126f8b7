use std::fmt;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::Serialize;

/// Depth of the DCGM diagnostic pass (`dcgmi diag -r <level>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuLevel {
    Quick,
    Standard,
    Extended,
}

impl GpuLevel {
    /// Numeric run level understood by `dcgmi diag -r`
    pub fn run_level(self) -> u8 {
        match self {
            GpuLevel::Quick => 1,
            GpuLevel::Standard => 2,
            GpuLevel::Extended => 3,
        }
    }

    pub fn from_run_level(level: u8) -> Result<Self> {
        match level {
            1 => Ok(GpuLevel::Quick),
            2 => Ok(GpuLevel::Standard),
            3 => Ok(GpuLevel::Extended),
            other => Err(anyhow!("Invalid GPU diagnostic level {} (expected 1, 2 or 3)", other)),
        }
    }
}

impl fmt::Display for GpuLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuLevel::Quick => write!(f, "quick"),
            GpuLevel::Standard => write!(f, "standard"),
            GpuLevel::Extended => write!(f, "extended"),
        }
    }
}

/// Options for one run, fixed once the command line is parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    pub output_root: PathBuf,
    pub gpu_level: GpuLevel,
    pub memory_test: bool,
    pub verbosity: u8,
    /// Skip the interactive disclosure prompt
    pub assume_yes: bool,
}

impl RunConfig {
    /// Check that the output root is an existing directory
    pub fn validate(&self) -> Result<()> {
        if !self.output_root.is_dir() {
            return Err(anyhow!(
                "Output directory {} does not exist or is not a directory",
                self.output_root.display()
            ));
        }
        Ok(())
    }
}
