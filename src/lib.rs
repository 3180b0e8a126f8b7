//! # hpc-diag
//!
//! A diagnostic collector for HPC and GPU virtual machines.
//!
//! ## Overview
//!
//! hpc-diag gathers logs, hardware inventory and optional benchmark and GPU
//! diagnostic output from a single cloud VM and packs them into one
//! `<vm_id>.<timestamp>.tar.gz` archive for offline support analysis.
//! Which optional hardware is probed is decided from the instance size
//! reported by the metadata service.
//!
//! ## Features
//!
//! - **Capability classification**: InfiniBand, NVIDIA and AMD GPUs from the size name alone
//! - **Per-category collectors**: VM, CPU, Memory (STREAM), InfiniBand, NVIDIA, AMD
//! - **Failure isolation**: a failing or panicking collector never stops the run
//! - **GPU diagnostics**: DCGM passes that put persistence mode and the host
//!   engine back the way they were found, including on Ctrl-C
//! - **Fallback sources**: every artifact falls back to a placeholder note
//!
//! ## Usage
//!
//! ```no_run
//! use hpc_diag::config::{load_settings, GpuLevel, RunConfig};
//! use hpc_diag::host::Host;
//! use hpc_diag::orchestrator::{Orchestrator, RunOutcome};
//! use std::io;
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = RunConfig {
//!     output_root: PathBuf::from("/tmp"),
//!     gpu_level: GpuLevel::Quick,
//!     memory_test: false,
//!     verbosity: 0,
//!     assume_yes: true,
//! };
//! let settings = load_settings(None)?;
//! let host = Host::system(&settings)?;
//! let orchestrator = Orchestrator::new(config, settings, host);
//! if let RunOutcome::Completed { archive, .. } = orchestrator.run(io::stdin().lock(), io::stdout())? {
//!     println!("{}", archive.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface and the disclosure prompt
//! - [`classify`]: Instance size to hardware capabilities
//! - [`metadata`]: Instance metadata retrieval
//! - [`collectors`]: Per-category diagnostic collectors
//! - [`gpu`]: DCGM diagnostic pass and GPU state restoration
//! - [`orchestrator`]: The end-to-end run
//! - [`utils`]: Commands, HTTP, fallbacks, archive and summary
//! - [`config`]: Run options and YAML settings
//! - [`constants`]: Application-wide constants
//!
//! ## Safety
//!
//! The only `unsafe` code is the `geteuid` call in [`privileges`].

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Instance size classification
pub mod classify;

/// Core data models and structures used throughout the application
pub mod models;

/// Diagnostic collectors
pub mod collectors;

/// NVIDIA DCGM diagnostics
pub mod gpu;

/// Host access: tools, network and process table
pub mod host;

pub mod logging;

/// Instance metadata service
pub mod metadata;

pub mod orchestrator;

/// Utility functions for commands, fetching, compression and reporting
pub mod utils;

/// Run options and site settings
pub mod config;

/// Platform-specific privilege checks
pub mod privileges;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
