//! Binding request body.

use serde::Serialize;

/// Request body that assigns a workload to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub api_version: String,
    pub kind: String,
    pub metadata: BindingMetadata,
    pub target: BindingTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingTarget {
    pub kind: String,
    pub api_version: String,
    pub name: String,
}

impl Binding {
    /// Bind `workload` to `node`.
    pub fn new(workload: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Binding".to_string(),
            metadata: BindingMetadata {
                name: workload.into(),
            },
            target: BindingTarget {
                kind: "Node".to_string(),
                api_version: "v1".to_string(),
                name: node.into(),
            },
        }
    }
}
