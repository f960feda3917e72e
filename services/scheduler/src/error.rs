//! Error types for the scheduler.

use std::time::Duration;

use thiserror::Error;

/// Errors from orchestrator API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status of a rejected request, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            ApiError::Decode(_) => None,
        }
    }
}

/// Why a single node probe produced no value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("telemetry backend returned status {0}")]
    Status(u16),

    #[error("invalid telemetry response: {0}")]
    Decode(String),

    #[error("no data found for query")]
    NoData,

    #[error("non-finite metric value {0}")]
    NonFinite(f64),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe task ended without reporting")]
    Aborted,
}

/// Errors that stop a telemetry fan-out before any sample is produced.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CollectError {
    #[error("node set must contain at least one node")]
    EmptyNodeSet,

    #[error("telemetry collection cancelled")]
    Cancelled,
}

/// No probe of the attempt produced a usable value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no candidate node: all {probed} probes failed")]
pub struct NoCandidateError {
    pub probed: usize,
}

/// The orchestrator did not accept a binding.
#[derive(Debug, Error)]
#[error("failed to bind {workload} to {node} in namespace {namespace}: {source}")]
pub struct BindError {
    pub workload: String,
    pub node: String,
    pub namespace: String,
    #[source]
    pub source: ApiError,
}

/// Reasons a scheduling attempt was abandoned.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("node inventory unavailable: {0}")]
    Inventory(#[source] ApiError),

    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    NoCandidate(#[from] NoCandidateError),

    #[error(transparent)]
    Bind(#[from] BindError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_message() {
        let err = BindError {
            workload: "pod-a".to_string(),
            node: "node-1".to_string(),
            namespace: "default".to_string(),
            source: ApiError::Status {
                status: 409,
                body: "already bound".to_string(),
            },
        };

        assert_eq!(
            err.to_string(),
            "failed to bind pod-a to node-1 in namespace default: unexpected status 409: already bound"
        );
        assert_eq!(err.source.status(), Some(409));
    }

    #[test]
    fn test_attempt_error_is_transparent() {
        let err = AttemptError::from(NoCandidateError { probed: 3 });
        assert_eq!(err.to_string(), "no candidate node: all 3 probes failed");
    }
}
