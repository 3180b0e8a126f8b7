//! Diagnostic collectors.
//!
//! Each collector owns one subdirectory of the bundle and runs in its own
//! execution window: a failure or panic inside one is recorded and the run
//! moves on to the next.
//!
//! ## Run Order
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  VM            always                    │
//! │  CPU           always                    │
//! │  Memory        --mem-level given         │
//! │  Infiniband    size has RDMA             │
//! │  Nvidia        NVIDIA GPU size           │
//! │  AMD           AMD visualization size    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use hpc_diag::collectors::{planned_collectors, run_isolated, CollectionContext};
//! use std::path::Path;
//!
//! # fn example(ctx: &CollectionContext) {
//! let (collectors, _skipped) = planned_collectors(&ctx.capabilities, ctx.config.memory_test);
//! for collector in &collectors {
//!     let outcome = run_isolated(collector.as_ref(), ctx, Path::new("/tmp/bundle"));
//!     println!("{}: {:?}", outcome.name, outcome.status);
//! }
//! # }
//! ```

/// Collector trait, shared context and the isolation wrapper
pub mod collector;

pub mod amd;
pub mod cpu;
pub mod infiniband;

/// STREAM memory bandwidth benchmark
pub mod memory;

pub mod nvidia;
pub mod vm;

pub use collector::{run_isolated, CollectionContext, Collector};

use crate::classify::Capabilities;
use crate::models::CollectorOutcome;

/// Collectors to run for this host, in order, plus outcomes for the ones
/// that do not apply.
pub fn planned_collectors(
    capabilities: &Capabilities,
    memory_test: bool,
) -> (Vec<Box<dyn Collector>>, Vec<CollectorOutcome>) {
    let mut planned: Vec<Box<dyn Collector>> = vec![Box::new(vm::VmCollector), Box::new(cpu::CpuCollector)];
    let mut skipped = Vec::new();

    let optional: [(bool, Box<dyn Collector>, &str); 4] = [
        (memory_test, Box::new(memory::MemoryCollector), "memory test not requested"),
        (capabilities.infiniband, Box::new(infiniband::InfinibandCollector), "no InfiniBand on this size"),
        (capabilities.nvidia_gpu, Box::new(nvidia::NvidiaCollector), "no NVIDIA GPU on this size"),
        (capabilities.amd_gpu, Box::new(amd::AmdCollector), "no AMD GPU on this size"),
    ];
    for (enabled, collector, reason) in optional {
        if enabled {
            planned.push(collector);
        } else {
            skipped.push(CollectorOutcome::skipped(collector.name(), reason));
        }
    }

    (planned, skipped)
}
