//! Watch stream records.
//!
//! The orchestrator streams one JSON document per line while a watch is open:
//!
//! ```text
//! {"type":"ADDED","object":{"metadata":{"name":"web-0"},"spec":{...},"status":{...}}}
//! {"type":"BOOKMARK","object":{"metadata":{"resourceVersion":"1042"}}}
//! {"type":"ERROR","object":{"kind":"Status","code":410,"reason":"Expired"}}
//! ```
//!
//! Workload records are decoded into [`WorkloadEvent`]; bookmarks and error
//! statuses are surfaced separately so the consumer can manage its resume cursor.

use serde::Deserialize;

use crate::{EventError, ObjectMeta};

/// Phase of a workload that has not been placed on a node yet.
pub const PHASE_PENDING: &str = "Pending";

/// Namespace used when a workload does not carry one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Resolve an optional namespace, treating absent and empty alike.
pub fn effective_namespace(namespace: Option<&str>) -> &str {
    match namespace {
        Some(ns) if !ns.is_empty() => ns,
        _ => DEFAULT_NAMESPACE,
    }
}

/// Kind of change carried by a workload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Wire name of the change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "ADDED",
            ChangeType::Modified => "MODIFIED",
            ChangeType::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded workload lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    pub change_type: ChangeType,
    pub name: String,
    pub namespace: Option<String>,
    pub phase: String,
    pub scheduler_name: String,
    pub resource_version: Option<String>,
}

impl WorkloadEvent {
    /// Whether this scheduler should try to place the workload.
    ///
    /// Only freshly added, pending workloads that name `scheduler_name` qualify.
    pub fn is_schedulable_by(&self, scheduler_name: &str) -> bool {
        self.change_type == ChangeType::Added
            && self.phase == PHASE_PENDING
            && self.scheduler_name == scheduler_name
    }

    /// Namespace of the workload, falling back to [`DEFAULT_NAMESPACE`].
    pub fn namespace_or_default(&self) -> &str {
        effective_namespace(self.namespace.as_deref())
    }
}

/// Status object attached to an `ERROR` record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WatchStatus {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WatchStatus {
    /// The requested resource version is too old to resume from.
    pub fn is_expired(&self) -> bool {
        self.code == Some(410) || matches!(self.reason.as_deref(), Some("Expired" | "Gone"))
    }
}

impl std::fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code}")?,
            None => f.write_str("unknown")?,
        }
        if let Some(reason) = &self.reason {
            write!(f, " {reason}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// One record read from a watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchRecord {
    /// A workload was added, modified or deleted.
    Workload(WorkloadEvent),
    /// Progress marker carrying only a resource version.
    Bookmark { resource_version: Option<String> },
    /// The server reported an error and will close the stream.
    Error(WatchStatus),
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    change_type: String,
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: WorkloadSpec,
    #[serde(default)]
    status: WorkloadStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadSpec {
    #[serde(default)]
    scheduler_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkloadStatus {
    #[serde(default)]
    phase: Option<String>,
}

/// Decode a single line of a watch stream.
pub fn decode_line(line: &[u8]) -> Result<WatchRecord, EventError> {
    let raw: RawRecord =
        serde_json::from_slice(line).map_err(|e| EventError::Malformed(e.to_string()))?;

    let change_type = match raw.change_type.as_str() {
        "ADDED" => ChangeType::Added,
        "MODIFIED" => ChangeType::Modified,
        "DELETED" => ChangeType::Deleted,
        "BOOKMARK" => {
            let object: WorkloadObject = serde_json::from_value(raw.object)
                .map_err(|e| EventError::InvalidObject(e.to_string()))?;
            return Ok(WatchRecord::Bookmark {
                resource_version: object.metadata.resource_version,
            });
        }
        "ERROR" => {
            let status: WatchStatus = serde_json::from_value(raw.object)
                .map_err(|e| EventError::InvalidObject(e.to_string()))?;
            return Ok(WatchRecord::Error(status));
        }
        other => return Err(EventError::UnknownChangeType(other.to_string())),
    };

    let object: WorkloadObject = serde_json::from_value(raw.object)
        .map_err(|e| EventError::InvalidObject(e.to_string()))?;

    let name = match object.metadata.name {
        Some(name) if !name.is_empty() => name,
        _ => return Err(EventError::InvalidObject("missing metadata.name".to_string())),
    };

    Ok(WatchRecord::Workload(WorkloadEvent {
        change_type,
        name,
        namespace: object.metadata.namespace,
        phase: object.status.phase.unwrap_or_default(),
        scheduler_name: object.spec.scheduler_name.unwrap_or_default(),
        resource_version: object.metadata.resource_version,
    }))
}
