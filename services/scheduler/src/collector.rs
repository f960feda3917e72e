//! Telemetry fan-out across candidate nodes.
//!
//! One probe task is spawned per node. Tasks share nothing but a semaphore
//! bounding how many run at once; each reports exactly one [`TelemetrySample`]
//! over a channel. The caller waits for every node to report (or for
//! shutdown), so the decision step always sees the full picture.
//!
//! A probe that errors, times out or yields a non-finite value is recorded as
//! [`ProbeOutcome::Failed`] and never affects its siblings.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{CollectError, ProbeError};

/// Source of a per-node metric value.
#[async_trait]
pub trait MetricSource: Send + Sync + 'static {
    /// Query the metric for a single node.
    async fn node_metric(&self, node: &str) -> Result<f64, ProbeError>;
}

/// Result of probing one node.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Ok(f64),
    Failed(ProbeError),
}

/// One node's probe result for a single scheduling attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub node: String,
    pub outcome: ProbeOutcome,
}

impl TelemetrySample {
    pub fn ok(node: impl Into<String>, value: f64) -> Self {
        Self {
            node: node.into(),
            outcome: ProbeOutcome::Ok(value),
        }
    }

    pub fn failed(node: impl Into<String>, cause: ProbeError) -> Self {
        Self {
            node: node.into(),
            outcome: ProbeOutcome::Failed(cause),
        }
    }

    /// The metric value, if the probe succeeded.
    pub fn value(&self) -> Option<f64> {
        match self.outcome {
            ProbeOutcome::Ok(value) => Some(value),
            ProbeOutcome::Failed(_) => None,
        }
    }
}

/// Fan-out limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Deadline for a single probe, counted from when it starts running.
    pub probe_timeout: Duration,

    /// Maximum probes in flight at once.
    pub max_in_flight: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            max_in_flight: 64,
        }
    }
}

/// Queries every candidate node concurrently.
pub struct TelemetryCollector<M> {
    source: Arc<M>,
    config: CollectorConfig,
}

impl<M: MetricSource> TelemetryCollector<M> {
    pub fn new(source: Arc<M>, config: CollectorConfig) -> Self {
        Self { source, config }
    }

    /// Probe each distinct node once and return one sample per node, sorted by name.
    ///
    /// Fails with [`CollectError::EmptyNodeSet`] before issuing any probe if
    /// `nodes` is empty, and with [`CollectError::Cancelled`] if shutdown is
    /// signalled while probes are in flight (outstanding probes are aborted).
    pub async fn collect(
        &self,
        nodes: &[String],
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<TelemetrySample>, CollectError> {
        let nodes: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
        if nodes.is_empty() {
            return Err(CollectError::EmptyNodeSet);
        }

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let (tx, mut rx) = mpsc::channel(nodes.len());
        let mut tasks = JoinSet::new();

        for node in &nodes {
            let node = node.to_string();
            let source = Arc::clone(&self.source);
            let permits = Arc::clone(&permits);
            let tx = tx.clone();
            let deadline = self.config.probe_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let outcome = match tokio::time::timeout(deadline, source.node_metric(&node)).await
                {
                    Ok(Ok(value)) if value.is_finite() => ProbeOutcome::Ok(value),
                    Ok(Ok(value)) => ProbeOutcome::Failed(ProbeError::NonFinite(value)),
                    Ok(Err(e)) => ProbeOutcome::Failed(e),
                    Err(_) => ProbeOutcome::Failed(ProbeError::Timeout(deadline)),
                };
                let _ = tx.send(TelemetrySample { node, outcome }).await;
            });
        }
        drop(tx);

        let mut samples = Vec::with_capacity(nodes.len());
        loop {
            tokio::select! {
                sample = rx.recv() => {
                    let Some(sample) = sample else { break };
                    match &sample.outcome {
                        ProbeOutcome::Ok(value) => {
                            debug!(node = %sample.node, value, "Probe succeeded");
                        }
                        ProbeOutcome::Failed(e) => {
                            warn!(node = %sample.node, error = %e, "Error retrieving node metric");
                        }
                    }
                    samples.push(sample);
                }
                _ = crate::shutdown_requested(shutdown) => {
                    tasks.abort_all();
                    return Err(CollectError::Cancelled);
                }
            }
        }

        // Every sender is gone; a node still missing lost its task before reporting.
        let reported: HashSet<&str> = samples.iter().map(|s| s.node.as_str()).collect();
        let missing: Vec<&str> = nodes
            .iter()
            .copied()
            .filter(|node| !reported.contains(node))
            .collect();
        for node in missing {
            warn!(node = %node, "Probe task ended without reporting");
            samples.push(TelemetrySample::failed(node, ProbeError::Aborted));
        }

        samples.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(samples)
    }
}
