use serde::{Deserialize, Serialize};

/// How a collector's execution window ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectorStatus {
    Completed,
    Failed,
    Skipped,
}

/// Per-collector record kept for the collection summary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectorOutcome {
    pub name: String,
    pub status: CollectorStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CollectorOutcome {
    pub fn skipped(name: &str, reason: &str) -> Self {
        CollectorOutcome {
            name: name.to_string(),
            status: CollectorStatus::Skipped,
            error: Some(reason.to_string()),
            duration_ms: 0,
        }
    }
}
