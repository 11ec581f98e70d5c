//! Label bookkeeping for the replica set, its pods and the service
//!
//! The selector is the workload labels minus the reserved markers. Pod
//! template labels are the selector plus the markers plus any extra pod
//! labels, so the selector always matches the template. The service picks
//! pods by identity and the routable marker only.

use crate::error::{ReservedLabelSnafu, Result};
use snafu::ensure;
use std::collections::BTreeMap;

/// Identity key: `run=<workload name>`
pub const IDENTITY_LABEL: &str = "run";
/// Marker picked up by cluster visualisers
pub const VISUALIZE_LABEL: &str = "visualize";
/// Routable marker: pods carrying it receive service traffic
pub const ROUTABLE_LABEL: &str = "traffic";
pub const ROUTABLE_VALUE: &str = "yes";

/// Marker keys that never appear in a selector
pub const RESERVED_MARKERS: [&str; 2] = [VISUALIZE_LABEL, ROUTABLE_LABEL];

/// Labels every workload object starts with
pub fn workload_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (IDENTITY_LABEL.to_string(), name.to_string()),
        (VISUALIZE_LABEL.to_string(), "true".to_string()),
        (ROUTABLE_LABEL.to_string(), ROUTABLE_VALUE.to_string()),
    ])
}

/// Replica set selector: `labels` without the reserved markers
pub fn selector(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(k, _)| !RESERVED_MARKERS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Pod template labels: selector, markers, then the caller's extra pod labels
pub fn template_labels(
    selector: &BTreeMap<String, String>,
    pod_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = selector.clone();
    labels.insert(VISUALIZE_LABEL.to_string(), "true".to_string());
    labels.insert(ROUTABLE_LABEL.to_string(), ROUTABLE_VALUE.to_string());
    for (k, v) in pod_labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    labels
}

/// Service selector: identity plus the routable marker
pub fn service_selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (IDENTITY_LABEL.to_string(), name.to_string()),
        (ROUTABLE_LABEL.to_string(), ROUTABLE_VALUE.to_string()),
    ])
}

/// Extra pod labels may not shadow keys k0ube manages
pub fn check_pod_labels(pod_labels: &BTreeMap<String, String>) -> Result<()> {
    for key in pod_labels.keys() {
        ensure!(
            key != IDENTITY_LABEL && !RESERVED_MARKERS.contains(&key.as_str()),
            ReservedLabelSnafu { key }
        );
    }
    Ok(())
}
