use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use crate::config::{GpuLevel, RunConfig};
use crate::constants::DISCLOSURE;

/// Command-line arguments for hpcdiag.
///
/// Collects logs, hardware inventory and optional GPU and memory diagnostics
/// from an HPC or GPU virtual machine into a single `.tar.gz` archive.
#[derive(Parser, Debug)]
#[clap(name = "hpcdiag", version, about = "Diagnostic collector for HPC and GPU virtual machines")]
pub struct Args {
    /// Directory in which the archive is written
    #[clap(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// DCGM diagnostic depth: 1 quick, 2 standard, 3 extended
    #[clap(long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=3))]
    pub gpu_level: u8,

    /// Run the STREAM memory bandwidth benchmark when greater than 0
    #[clap(long, default_value = "0")]
    pub mem_level: u64,

    /// More output (-v debug, -vv trace)
    #[clap(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Accept the disclosure without prompting
    #[clap(short = 'y', long)]
    pub yes: bool,

    /// YAML settings file overriding endpoints, timeouts and lookup tables
    #[clap(short, long)]
    pub config: Option<PathBuf>,
}

impl Args {
    pub fn to_run_config(&self) -> Result<RunConfig> {
        Ok(RunConfig {
            output_root: self.dir.clone(),
            gpu_level: GpuLevel::from_run_level(self.gpu_level)?,
            memory_test: self.mem_level > 0,
            verbosity: self.verbose,
            assume_yes: self.yes,
        })
    }
}

/// Show the disclosure and ask for consent. Anything but `y`/`yes` declines,
/// including end of input.
pub fn confirm_disclosure<R: BufRead, W: Write>(mut input: R, mut output: W) -> Result<bool> {
    writeln!(output, "{}\n", DISCLOSURE).context("Failed to write prompt")?;
    write!(output, "Do you want to continue? [y/N] ").context("Failed to write prompt")?;
    output.flush().context("Failed to write prompt")?;

    let mut answer = String::new();
    input.read_line(&mut answer).context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
