//! tsched scheduler library.
//!
//! The crate ships the `tsched` binary; the library surface exists so the
//! control loop and its adapters can be exercised by integration tests.
//!
//! ## Architecture
//!
//! - **Watch**: Streams workload records from the orchestrator, reconnecting as needed
//! - **Scheduler**: Filters events and drives one placement attempt at a time
//! - **Collector**: Probes every ready node's metric concurrently, with a per-probe deadline
//! - **Decision**: Picks the node with the lowest value
//! - **Binder**: Submits the placement to the orchestrator

pub mod backoff;
pub mod binder;
pub mod collector;
pub mod config;
pub mod decision;
pub mod error;
pub mod kube;
pub mod kubeconfig;
pub mod scheduler;
pub mod telemetry;
pub mod watch;

pub use binder::{Binder, BindingApi};
pub use collector::{CollectorConfig, MetricSource, ProbeOutcome, TelemetryCollector, TelemetrySample};
pub use config::{Cli, Config, LogFormat};
pub use decision::{select_best, PlacementDecision, Selection};
pub use error::{ApiError, AttemptError, BindError, CollectError, NoCandidateError, ProbeError};
pub use kube::{ApiConfig, KubeClient};
pub use kubeconfig::{Kubeconfig, KubeconfigError};
pub use scheduler::{AttemptOutcome, AttemptState, NodeInventory, RunStats, Scheduler};
pub use telemetry::{TelemetryClient, TelemetryConfig};
pub use watch::{ChunkStream, PodWatcher, WatchConfig, WatchState, WatchTransport};

/// Resolves once shutdown has been signalled.
///
/// A dropped sender is not a shutdown request; the future then never resolves.
pub(crate) async fn shutdown_requested(shutdown: &mut tokio::sync::watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
