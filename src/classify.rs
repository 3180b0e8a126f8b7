//! Hardware capability detection from the instance size string.
//!
//! The instance size is an opaque identifier such as `Standard_HB120rs_v2`
//! or `Standard_ND40rs_v2`. Capabilities are inferred from naming
//! conventions only; nothing on the host is inspected.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Prefix shared by every GPU-bearing instance family
const GPU_FAMILY_PREFIX: &str = "standard_n";

lazy_static! {
    /// A digit immediately followed by `r` marks an RDMA (InfiniBand) capable size
    static ref INFINIBAND_PATTERN: Regex = Regex::new(r"[0-9]r").expect("valid regex");

    /// NVv4 sizes carry AMD accelerators
    static ref AMD_GPU_PATTERN: Regex = Regex::new(r"^standard_nv.*_v4$").expect("valid regex");
}

/// Optional hardware categories that apply to an instance size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub infiniband: bool,
    pub nvidia_gpu: bool,
    pub amd_gpu: bool,
    pub gpu_visualization: bool,
}

/// Classify an instance size. Matching is case-insensitive and never fails;
/// an empty or unrecognized size yields no capabilities.
pub fn classify(instance_size: &str) -> Capabilities {
    let size = instance_size.trim().to_lowercase();

    let gpu_family = size.starts_with(GPU_FAMILY_PREFIX);
    let amd_gpu = AMD_GPU_PATTERN.is_match(&size);

    Capabilities {
        infiniband: INFINIBAND_PATTERN.is_match(&size),
        nvidia_gpu: gpu_family && !amd_gpu,
        amd_gpu,
        gpu_visualization: gpu_family,
    }
}
