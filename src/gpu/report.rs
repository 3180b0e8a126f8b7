//! Extraction of device ids from a `dcgmi diag` text report.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PERSISTENCE_DISABLED: Regex =
        Regex::new(r"(?i)persistence mode for gpu\s+(\d+)\s+is disabled").expect("valid regex");
}

/// GPU ids the report lists as lacking persistence mode, sorted and deduplicated.
///
/// The report is a box-drawn table whose right column wraps long warnings
/// across rows, so table borders are stripped and whitespace collapsed
/// before matching.
pub fn devices_lacking_persistence(report: &str) -> Vec<u32> {
    let flattened = report
        .replace(['|', '+'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut devices: Vec<u32> = PERSISTENCE_DISABLED
        .captures_iter(&flattened)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();
    devices.sort_unstable();
    devices.dedup();
    devices
}
