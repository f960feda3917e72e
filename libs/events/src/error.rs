//! Error types for decoding orchestrator records.

use thiserror::Error;

/// Errors that can occur when decoding a record from the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The line is not valid JSON, or does not have the watch event shape.
    #[error("malformed watch record: {0}")]
    Malformed(String),

    /// The change type is not one the orchestrator is known to send.
    #[error("unknown change type: {0}")]
    UnknownChangeType(String),

    /// The embedded object could not be decoded as a workload.
    #[error("invalid workload object: {0}")]
    InvalidObject(String),
}
