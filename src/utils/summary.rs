use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::classify::Capabilities;
use crate::config::RunConfig;
use crate::metadata::InstanceDescriptor;
use crate::models::{CollectorOutcome, CollectorStatus};

/// Create a JSON summary of the collection.
///
/// Records who ran where, with which options, and how each collector's
/// execution window ended. Written into the bundle just before archiving.
///
/// # Example Output
///
/// ```json
/// {
///   "collection_id": "550e8400-e29b-41d4-a716-446655440000",
///   "hostname": "hpc-node-01",
///   "instance": { "vm_id": "...", "vm_size": "Standard_HB120rs_v2", "timestamp": "..." },
///   "capabilities": { "infiniband": true, ... },
///   "collectors": [ { "name": "VM", "status": "completed", ... } ],
///   "failed_collectors": 0
/// }
/// ```
pub fn create_collection_summary(
    instance: &InstanceDescriptor,
    capabilities: &Capabilities,
    config: &RunConfig,
    outcomes: &[CollectorOutcome],
) -> Result<String> {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let failed = outcomes
        .iter()
        .filter(|o| o.status == CollectorStatus::Failed)
        .count();

    let summary = json!({
        "collection_id": Uuid::new_v4().to_string(),
        "hostname": hostname,
        "instance": {
            "vm_id": instance.vm_id,
            "vm_size": instance.vm_size,
            "timestamp": instance.timestamp,
        },
        "completed_at": Utc::now().to_rfc3339(),
        "capabilities": capabilities,
        "options": {
            "gpu_level": config.gpu_level,
            "memory_test": config.memory_test,
        },
        "collectors": outcomes,
        "failed_collectors": failed,
        "collector_version": env!("CARGO_PKG_VERSION"),
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize collection summary to JSON")
}
