//! Global constants for the hpc-diag application.
//!
//! Endpoints, directory names and file names that make up the bundle layout
//! are centralized here so the layout contract lives in one place.

// Remote endpoints
/// Instance metadata service endpoint
pub const METADATA_URL: &str = "http://169.254.169.254/metadata/instance?api-version=2019-06-01";

/// Precompiled STREAM benchmark package
pub const STREAM_PACKAGE_URL: &str =
    "https://azhpcstor.blob.core.windows.net/diagtool-binaries/stream.tgz";

/// Upstream lsvmbus script, used when the native tool is missing
pub const LSVMBUS_SCRIPT_URL: &str =
    "https://raw.githubusercontent.com/torvalds/linux/master/tools/hv/lsvmbus";

/// Header required by the metadata service
pub const METADATA_HEADER: (&str, &str) = ("Metadata", "true");

/// HTTP request timeout in seconds
pub const HTTP_TIMEOUT_SECS: u64 = 30;

// Timeouts
/// Quick (level 1) DCGM diagnostic timeout (5 minutes)
pub const GPU_QUICK_TIMEOUT_SECS: u64 = 5 * 60;

/// Standard (level 2) DCGM diagnostic timeout (20 minutes)
pub const GPU_STANDARD_TIMEOUT_SECS: u64 = 20 * 60;

/// Extended (level 3) DCGM diagnostic timeout (60 minutes)
pub const GPU_EXTENDED_TIMEOUT_SECS: u64 = 60 * 60;

/// STREAM benchmark timeout (10 minutes)
pub const STREAM_TIMEOUT_SECS: u64 = 10 * 60;

/// Poll interval while waiting on a child process with a deadline
pub const COMMAND_POLL_INTERVAL_MS: u64 = 50;

// Bundle layout
pub const VM_DIR: &str = "VM";
pub const CPU_DIR: &str = "CPU";
pub const MEMORY_DIR: &str = "Memory";
pub const INFINIBAND_DIR: &str = "Infiniband";
pub const NVIDIA_DIR: &str = "Nvidia";
pub const AMD_DIR: &str = "AMD";

pub const GENERAL_LOG_NAME: &str = "general.log";
pub const SUMMARY_NAME: &str = "collection_summary.json";
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Timestamp format used in the bundle directory name (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// Host paths, resolved under the configured sysroot
pub const WAAGENT_LOG_PATH: &str = "var/log/waagent.log";
pub const SYSLOG_PATH: &str = "var/log/syslog";
pub const MESSAGES_LOG_PATH: &str = "var/log/messages";
pub const IB_EXTENSION_STATUS_PATH: &str = "var/log/azure/ib-vmext-status";
pub const NVIDIA_EXTENSION_STATUS_PATH: &str = "var/log/azure/nvidia-vmext-status";
pub const INFINIBAND_SYSFS_PATH: &str = "sys/class/infiniband";

/// Partition key indices copied for each InfiniBand device
pub const PKEY_INDICES: &[u32] = &[0, 1];

/// Provisioning extensions that touch the same hardware state
pub const EXTENSION_PROCESS_PATTERNS: &[&str] = &[
    "Microsoft.HpcCompute.NvidiaGpuDriverLinux",
    "Microsoft.HpcCompute.InfiniBandDriverLinux",
];

// Environment variables
pub const ENV_METADATA_URL: &str = "HPCDIAG_METADATA_URL";
pub const ENV_SYSROOT: &str = "HPCDIAG_SYSROOT";

// Placeholder messages
pub const NO_WAAGENT_LOGS: &str = "No waagent logs found";
pub const NO_SYSTEM_LOGS: &str = "No system logs found";
pub const NO_LSVMBUS: &str =
    "lsvmbus is not installed and the upstream script could not be fetched or run";
pub const AMD_NOT_SUPPORTED: &str = "AMD GPU diagnostics are not yet supported";

/// Disclosure shown before any collection begins
pub const DISCLOSURE: &str = "\
This tool collects diagnostic information from this machine: kernel and system logs,
hardware inventory, network configuration and instance metadata. It may run GPU
diagnostics that temporarily change GPU persistence mode, and optionally a memory
bandwidth benchmark. The output archive may contain identifying information about
this machine. Nothing is transmitted; the archive stays on local disk.";
