use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::GpuLevel;
use crate::constants::{
    ENV_METADATA_URL, ENV_SYSROOT, EXTENSION_PROCESS_PATTERNS, GPU_EXTENDED_TIMEOUT_SECS,
    GPU_QUICK_TIMEOUT_SECS, GPU_STANDARD_TIMEOUT_SECS, LSVMBUS_SCRIPT_URL, METADATA_URL,
    STREAM_PACKAGE_URL, STREAM_TIMEOUT_SECS,
};

/// Wall-clock limits for each DCGM diagnostic depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuTimeouts {
    pub quick_secs: u64,
    pub standard_secs: u64,
    pub extended_secs: u64,
}

impl Default for GpuTimeouts {
    fn default() -> Self {
        GpuTimeouts {
            quick_secs: GPU_QUICK_TIMEOUT_SECS,
            standard_secs: GPU_STANDARD_TIMEOUT_SECS,
            extended_secs: GPU_EXTENDED_TIMEOUT_SECS,
        }
    }
}

impl GpuTimeouts {
    pub fn for_level(&self, level: GpuLevel) -> Duration {
        let secs = match level {
            GpuLevel::Quick => self.quick_secs,
            GpuLevel::Standard => self.standard_secs,
            GpuLevel::Extended => self.extended_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Site settings: endpoints, limits and lookup tables.
///
/// Every field has a built-in default, so a settings file only needs to
/// name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub metadata_url: String,
    pub stream_package_url: String,
    pub lsvmbus_script_url: String,
    /// Root under which host files (`/var/log`, `/sys`) are resolved
    pub sysroot: PathBuf,
    /// Command-line fragments identifying conflicting provisioning extensions
    pub extension_processes: Vec<String>,
    pub gpu_timeouts: GpuTimeouts,
    pub stream_timeout_secs: u64,
    /// Lowercased instance size -> CPU list handed to `GOMP_CPU_AFFINITY`
    pub stream_affinity: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            metadata_url: METADATA_URL.to_string(),
            stream_package_url: STREAM_PACKAGE_URL.to_string(),
            lsvmbus_script_url: LSVMBUS_SCRIPT_URL.to_string(),
            sysroot: PathBuf::from("/"),
            extension_processes: EXTENSION_PROCESS_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            gpu_timeouts: GpuTimeouts::default(),
            stream_timeout_secs: STREAM_TIMEOUT_SECS,
            stream_affinity: default_stream_affinity(),
        }
    }
}

/// One STREAM thread per L3 cache domain on the HPC sizes.
fn default_stream_affinity() -> BTreeMap<String, String> {
    let every_fourth = |cores: u32| {
        (0..cores)
            .step_by(4)
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut table = BTreeMap::new();
    table.insert("standard_hb120rs_v2".to_string(), every_fourth(120));
    table.insert("standard_hb60rs".to_string(), every_fourth(60));
    table.insert("standard_hc44rs".to_string(), "0-43".to_string());
    table
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read settings file: {}", path.display()))?;

        let settings: Settings = serde_yaml::from_str(&content)
            .context("Failed to parse YAML settings")?;

        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `HPCDIAG_*` environment overrides
    pub fn apply_environment_overrides(&mut self) {
        if let Ok(url) = env::var(ENV_METADATA_URL) {
            info!("Using metadata endpoint from {}: {}", ENV_METADATA_URL, url);
            self.metadata_url = url;
        }
        if let Ok(root) = env::var(ENV_SYSROOT) {
            info!("Using sysroot from {}: {}", ENV_SYSROOT, root);
            self.sysroot = PathBuf::from(root);
        }
    }

    /// Resolve a host path (relative to `/`) under the configured sysroot
    pub fn host_path(&self, relative: &str) -> PathBuf {
        self.sysroot.join(relative.trim_start_matches('/'))
    }

    /// CPU list for the STREAM benchmark, if the size is supported
    pub fn stream_affinity_for(&self, instance_size: &str) -> Option<&str> {
        self.stream_affinity
            .get(&instance_size.trim().to_lowercase())
            .map(String::as_str)
    }
}

/// Load settings from `path` if given, otherwise use defaults; environment
/// overrides are applied last.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::from_yaml_file(path)?,
        None => {
            debug!("No settings file provided, using defaults");
            Settings::default()
        }
    };
    settings.apply_environment_overrides();
    Ok(settings)
}
