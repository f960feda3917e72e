//! # tsched-events
//!
//! Wire types for the orchestrator API consumed by the scheduler.
//!
//! ## Records
//!
//! - Watch stream lines (`ADDED`, `MODIFIED`, `DELETED`, `BOOKMARK`, `ERROR`)
//!   decoded into [`WatchRecord`]
//! - Node listings flattened into [`NodeRef`] snapshots
//! - [`Binding`] request bodies
//!
//! Decoding is lenient about missing sections and strict about shape: a record
//! that is not JSON, has an unknown change type, or names no workload is an
//! [`EventError`].

mod binding;
mod error;
mod node;
mod watch;

use serde::Deserialize;

pub use binding::*;
pub use error::EventError;
pub use node::*;
pub use watch::*;

/// Object metadata shared by all orchestrator records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub resource_version: Option<String>,
}
