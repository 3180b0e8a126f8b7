//! NVIDIA DCGM diagnostic pass and the host state it borrows.
//!
//! A pass moves through these phases:
//!
//! ```text
//! Idle -> DaemonStarting -> PersistenceEnabling -> DiagRunning
//!      -> PersistenceRestoring -> DaemonStopping -> Idle
//! ```
//!
//! The last two phases are [`GpuSession::restore`], reached from the normal
//! end of the pass (through [`RestoreGuard`]) and from the Ctrl-C handler
//! (through [`CleanupRegistry`]), which also removes any live [`ScratchDir`].

pub mod diagnostics;
pub mod report;
pub mod session;

pub use diagnostics::{run_gpu_diagnostics, GpuDiagOutcome};
pub use session::{CleanupRegistry, GpuPhase, GpuSession, RestoreGuard, ScratchDir};
