//! Node inventory records.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::ObjectMeta;

/// Condition type reported by a node that can accept workloads.
pub const CONDITION_READY: &str = "Ready";

/// Response body of a node list request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

impl Node {
    /// A node is ready iff it reports `Ready=True`.
    pub fn is_ready(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == CONDITION_READY && c.status == "True")
    }
}

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub name: String,
    pub ready: bool,
}

impl NodeList {
    /// Flatten the listing into one [`NodeRef`] per distinct node name, sorted by name.
    ///
    /// Unnamed items are dropped. A name listed twice is ready if any entry is.
    pub fn into_refs(self) -> Vec<NodeRef> {
        let mut nodes: BTreeMap<String, bool> = BTreeMap::new();
        for node in self.items {
            let ready = node.is_ready();
            let Some(name) = node.metadata.name.filter(|n| !n.is_empty()) else {
                continue;
            };
            *nodes.entry(name).or_default() |= ready;
        }

        nodes
            .into_iter()
            .map(|(name, ready)| NodeRef { name, ready })
            .collect()
    }
}
