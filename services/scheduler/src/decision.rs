//! Node selection.
//!
//! The best node is the one with the lowest successful metric value. Ties are
//! broken by node name so the same samples always produce the same choice,
//! whatever order the probes completed in.

use std::cmp::Ordering;

use tsched_events::WorkloadEvent;

use crate::collector::TelemetrySample;
use crate::error::NoCandidateError;

/// The winning node and its metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub node: String,
    pub value: f64,
}

/// Where a workload should be placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    pub workload_name: String,
    pub target_node: String,
    pub namespace: Option<String>,
}

impl PlacementDecision {
    /// Place the workload named by `event` on the selected node.
    pub fn new(event: &WorkloadEvent, selection: &Selection) -> Self {
        Self {
            workload_name: event.name.clone(),
            target_node: selection.node.clone(),
            namespace: event.namespace.clone(),
        }
    }

    /// Target namespace, falling back to `default`.
    pub fn namespace(&self) -> &str {
        tsched_events::effective_namespace(self.namespace.as_deref())
    }
}

/// Order candidates by value, then by node name.
fn compare(a: (&str, f64), b: (&str, f64)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0))
}

/// Pick the node with the minimum successful value.
pub fn select_best(samples: &[TelemetrySample]) -> Result<Selection, NoCandidateError> {
    samples
        .iter()
        .filter_map(|s| s.value().map(|v| (s.node.as_str(), v)))
        .min_by(|a, b| compare(*a, *b))
        .map(|(node, value)| Selection {
            node: node.to_string(),
            value,
        })
        .ok_or(NoCandidateError {
            probed: samples.len(),
        })
}
