use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;

use crate::constants::{METADATA_HEADER, TIMESTAMP_FORMAT};
use crate::utils::fetch::HttpFetcher;

/// Identity of the instance being diagnosed, read once from the metadata service.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDescriptor {
    pub vm_size: String,
    pub vm_id: String,
    /// UTC start of the run, formatted for use in file names
    pub timestamp: String,
    /// The metadata document exactly as served
    pub raw_metadata: Vec<u8>,
}

impl InstanceDescriptor {
    /// Build a descriptor from a metadata document.
    pub fn from_metadata(raw: Vec<u8>, started: DateTime<Utc>) -> Result<Self> {
        let document: Value = serde_json::from_slice(&raw)
            .context("Instance metadata is not valid JSON")?;

        let vm_id = lookup(&document, "vmId")
            .ok_or_else(|| anyhow!("Instance metadata does not contain a vmId"))?;
        // The id names the bundle directory, which is replaced if it exists
        if vm_id.contains(['/', '\\', '\0']) || vm_id.contains("..") {
            return Err(anyhow!("Instance metadata vmId {:?} is not usable as a file name", vm_id));
        }

        let vm_size = lookup(&document, "vmSize").unwrap_or_else(|| {
            warn!("Instance metadata does not contain a vmSize; no optional hardware will be probed");
            String::new()
        });

        Ok(InstanceDescriptor {
            vm_size,
            vm_id,
            timestamp: started.format(TIMESTAMP_FORMAT).to_string(),
            raw_metadata: raw,
        })
    }

    /// Name of the bundle directory and the archive's top-level entry
    pub fn bundle_name(&self) -> String {
        format!("{}.{}", self.vm_id, self.timestamp)
    }
}

/// Look a key up under `compute`, falling back to the document root.
fn lookup(document: &Value, key: &str) -> Option<String> {
    document
        .pointer(&format!("/compute/{}", key))
        .or_else(|| document.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fetch the instance descriptor. Failure here is fatal for the run.
pub fn fetch_instance_descriptor(fetcher: &dyn HttpFetcher, url: &str) -> Result<InstanceDescriptor> {
    let started = Utc::now();
    let raw = fetcher
        .get(url, &[METADATA_HEADER])
        .context("Could not reach the instance metadata service")?;

    let descriptor = InstanceDescriptor::from_metadata(raw, started)?;
    info!(
        "Instance {} (size {})",
        descriptor.vm_id,
        if descriptor.vm_size.is_empty() { "unknown" } else { &descriptor.vm_size }
    );
    Ok(descriptor)
}
