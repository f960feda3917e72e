//! The scheduling control loop.
//!
//! For every workload event, in arrival order:
//!
//! ```text
//! Idle -> FilteringEvent -> FetchingInventory -> ProbingTelemetry -> Deciding -> Binding -> Idle
//! ```
//!
//! Events are handled one at a time; only the telemetry probes inside an
//! attempt run concurrently. A failure at any stage abandons the attempt and
//! the loop moves on to the next event. Nothing is remembered between
//! attempts: a workload that could not be placed is retried only if the
//! orchestrator sends it again.

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tsched_events::{NodeRef, WorkloadEvent};

use crate::binder::{Binder, BindingApi};
use crate::collector::{MetricSource, TelemetryCollector};
use crate::decision::{self, PlacementDecision};
use crate::error::{ApiError, AttemptError};

/// Source of the node inventory snapshot.
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>, ApiError>;
}

/// Stage of the current scheduling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    FilteringEvent,
    FetchingInventory,
    ProbingTelemetry,
    Deciding,
    Binding,
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptState::Idle => write!(f, "idle"),
            AttemptState::FilteringEvent => write!(f, "filtering_event"),
            AttemptState::FetchingInventory => write!(f, "fetching_inventory"),
            AttemptState::ProbingTelemetry => write!(f, "probing_telemetry"),
            AttemptState::Deciding => write!(f, "deciding"),
            AttemptState::Binding => write!(f, "binding"),
        }
    }
}

/// How one event was handled.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The event is not for this scheduler.
    Skipped,
    /// The workload was bound.
    Bound(PlacementDecision),
    /// The attempt was abandoned.
    Failed(AttemptError),
}

/// Counters for one run of the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub events_seen: u64,
    pub skipped: u64,
    pub attempts: u64,
    pub bound: u64,
    pub failed: u64,
}

/// The scheduler: inventory, telemetry collector and binder wired together.
pub struct Scheduler<I, M, B> {
    scheduler_name: String,
    inventory: I,
    collector: TelemetryCollector<M>,
    binder: Binder<B>,
}

impl<I, M, B> Scheduler<I, M, B>
where
    I: NodeInventory,
    M: MetricSource,
    B: BindingApi,
{
    pub fn new(
        scheduler_name: impl Into<String>,
        inventory: I,
        collector: TelemetryCollector<M>,
        binder: Binder<B>,
    ) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            inventory,
            collector,
            binder,
        }
    }

    /// Consume `events` until the stream ends or shutdown is signalled.
    pub async fn run<S>(&self, events: S, mut shutdown: watch::Receiver<bool>) -> RunStats
    where
        S: Stream<Item = WorkloadEvent>,
    {
        let mut events = std::pin::pin!(events);
        let mut stats = RunStats::default();

        info!(scheduler_name = %self.scheduler_name, "Starting control loop");

        loop {
            let event = tokio::select! {
                event = events.next() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Event stream ended");
                        break;
                    }
                },
                _ = crate::shutdown_requested(&mut shutdown) => {
                    info!("Control loop shutting down");
                    break;
                }
            };

            stats.events_seen += 1;
            match self.handle_event(&event, &mut shutdown).await {
                AttemptOutcome::Skipped => stats.skipped += 1,
                AttemptOutcome::Bound(_) => {
                    stats.attempts += 1;
                    stats.bound += 1;
                }
                AttemptOutcome::Failed(_) => {
                    stats.attempts += 1;
                    stats.failed += 1;
                }
            }
        }

        info!(
            events_seen = stats.events_seen,
            skipped = stats.skipped,
            attempts = stats.attempts,
            bound = stats.bound,
            failed = stats.failed,
            "Control loop stopped"
        );
        stats
    }

    /// Handle a single event: filter it and, if it is ours, try to place it.
    pub async fn handle_event(
        &self,
        event: &WorkloadEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> AttemptOutcome {
        transition(event, AttemptState::FilteringEvent);
        if !event.is_schedulable_by(&self.scheduler_name) {
            transition(event, AttemptState::Idle);
            return AttemptOutcome::Skipped;
        }

        info!(
            workload = %event.name,
            namespace = %event.namespace_or_default(),
            "Scheduling workload"
        );

        let outcome = match self.attempt(event, shutdown).await {
            Ok(decision) => AttemptOutcome::Bound(decision),
            Err(e) => {
                match &e {
                    AttemptError::Bind(_) => {
                        error!(workload = %event.name, error = %e, "Scheduling attempt failed")
                    }
                    _ => warn!(workload = %event.name, error = %e, "Scheduling attempt failed"),
                }
                AttemptOutcome::Failed(e)
            }
        };

        transition(event, AttemptState::Idle);
        outcome
    }

    async fn attempt(
        &self,
        event: &WorkloadEvent,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PlacementDecision, AttemptError> {
        transition(event, AttemptState::FetchingInventory);
        let nodes = self
            .inventory
            .list_nodes()
            .await
            .map_err(AttemptError::Inventory)?;
        let total = nodes.len();
        let ready: Vec<String> = nodes
            .into_iter()
            .filter(|node| node.ready)
            .map(|node| node.name)
            .collect();
        debug!(workload = %event.name, total, ready = ready.len(), "Fetched node inventory");

        transition(event, AttemptState::ProbingTelemetry);
        let samples = self.collector.collect(&ready, shutdown).await?;

        transition(event, AttemptState::Deciding);
        let selection = decision::select_best(&samples)?;
        info!(
            workload = %event.name,
            node = %selection.node,
            value = selection.value,
            candidates = samples.iter().filter(|s| s.value().is_some()).count(),
            "Best node found"
        );

        transition(event, AttemptState::Binding);
        let decision = PlacementDecision::new(event, &selection);
        self.binder.bind(&decision).await?;

        Ok(decision)
    }
}

fn transition(event: &WorkloadEvent, state: AttemptState) {
    debug!(workload = %event.name, state = %state, "Attempt state");
}
