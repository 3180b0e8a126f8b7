//! Shared plumbing for the collectors and the orchestrator.
//!
//! ## Components
//!
//! - **Commands**: external tool invocation behind the [`command::CommandRunner`] seam
//! - **Fetch**: blocking HTTP behind the [`fetch::HttpFetcher`] seam
//! - **Fallback**: ordered artifact sources with a placeholder of last resort
//! - **Compression**: the final `.tar.gz` archive
//! - **Summary**: the `collection_summary.json` report
//!
//! ### Running a Tool With a Deadline
//!
//! ```no_run
//! use hpc_diag::utils::command::{CommandRunner, CommandSpec, SystemCommandRunner};
//! use std::time::Duration;
//!
//! # fn example() -> anyhow::Result<()> {
//! let runner = SystemCommandRunner::new();
//! let output = runner.run(&CommandSpec::new("lscpu").timeout(Duration::from_secs(10)))?;
//! if output.timed_out {
//!     println!("lscpu hung");
//! }
//! # Ok(())
//! # }
//! ```

/// External command execution
pub mod command;

/// Blocking HTTP retrieval
pub mod fetch;

pub mod fallback;

/// Archive creation
pub mod compress;

/// Collection summary generation
pub mod summary;
