//! Integration tests for the scheduling control loop.
//!
//! The orchestrator and the telemetry backend are replaced by in-memory
//! fakes so each test can assert exactly which probes and bindings happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rstest::rstest;
use tokio::sync::watch;
use tsched_events::{Binding, ChangeType, NodeRef, WorkloadEvent};
use tsched_scheduler::{
    ApiError, AttemptError, AttemptOutcome, Binder, BindingApi, CollectError, CollectorConfig,
    MetricSource, NodeInventory, ProbeError, RunStats, Scheduler, TelemetryCollector,
};

const SCHEDULER: &str = "latency-aware";

struct FakeInventory {
    nodes: Result<Vec<NodeRef>, u16>,
}

#[async_trait]
impl NodeInventory for FakeInventory {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>, ApiError> {
        self.nodes.clone().map_err(|status| ApiError::Status {
            status,
            body: "inventory unavailable".to_string(),
        })
    }
}

#[derive(Default)]
struct FakeMetrics {
    values: HashMap<String, Result<f64, ProbeError>>,
    probes: AtomicUsize,
}

#[async_trait]
impl MetricSource for FakeMetrics {
    async fn node_metric(&self, node: &str) -> Result<f64, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.values.get(node).cloned().unwrap_or(Err(ProbeError::NoData))
    }
}

#[derive(Clone, Default)]
struct RecordingBinder {
    bindings: Arc<Mutex<Vec<(String, Binding)>>>,
    reject_with: Option<u16>,
}

impl RecordingBinder {
    fn recorded(&self) -> Vec<(String, Binding)> {
        self.bindings.lock().unwrap().clone()
    }
}

#[async_trait]
impl BindingApi for RecordingBinder {
    async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<(), ApiError> {
        self.bindings
            .lock()
            .unwrap()
            .push((namespace.to_string(), binding.clone()));
        match self.reject_with {
            Some(status) => Err(ApiError::Status {
                status,
                body: "conflict".to_string(),
            }),
            None => Ok(()),
        }
    }
}

struct Harness {
    scheduler: Scheduler<FakeInventory, FakeMetrics, RecordingBinder>,
    metrics: Arc<FakeMetrics>,
    binder: RecordingBinder,
}

fn ready(name: &str) -> NodeRef {
    NodeRef {
        name: name.to_string(),
        ready: true,
    }
}

fn not_ready(name: &str) -> NodeRef {
    NodeRef {
        name: name.to_string(),
        ready: false,
    }
}

fn harness(
    nodes: Result<Vec<NodeRef>, u16>,
    values: &[(&str, Result<f64, ProbeError>)],
    binder: RecordingBinder,
) -> Harness {
    let metrics = Arc::new(FakeMetrics {
        values: values
            .iter()
            .map(|(node, v)| (node.to_string(), v.clone()))
            .collect(),
        ..FakeMetrics::default()
    });
    let collector = TelemetryCollector::new(Arc::clone(&metrics), CollectorConfig::default());
    let scheduler = Scheduler::new(
        SCHEDULER,
        FakeInventory { nodes },
        collector,
        Binder::new(binder.clone()),
    );
    Harness {
        scheduler,
        metrics,
        binder,
    }
}

fn pending(name: &str) -> WorkloadEvent {
    WorkloadEvent {
        change_type: ChangeType::Added,
        name: name.to_string(),
        namespace: None,
        phase: "Pending".to_string(),
        scheduler_name: SCHEDULER.to_string(),
        resource_version: None,
    }
}

#[rstest]
#[case::modified(ChangeType::Modified, "Pending", SCHEDULER)]
#[case::deleted(ChangeType::Deleted, "Pending", SCHEDULER)]
#[case::running(ChangeType::Added, "Running", SCHEDULER)]
#[case::other_scheduler(ChangeType::Added, "Pending", "default-scheduler")]
#[case::no_scheduler(ChangeType::Added, "Pending", "")]
#[tokio::test]
async fn test_ineligible_events_cause_no_probe_and_no_bind(
    #[case] change_type: ChangeType,
    #[case] phase: &str,
    #[case] scheduler_name: &str,
) {
    let h = harness(
        Ok(vec![ready("A"), ready("B")]),
        &[("A", Ok(1.0)), ("B", Ok(2.0))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let event = WorkloadEvent {
        change_type,
        phase: phase.to_string(),
        scheduler_name: scheduler_name.to_string(),
        ..pending("pod-a")
    };
    let outcome = h.scheduler.handle_event(&event, &mut shutdown).await;

    assert!(matches!(outcome, AttemptOutcome::Skipped));
    assert_eq!(h.metrics.probes.load(Ordering::SeqCst), 0);
    assert!(h.binder.recorded().is_empty());
}

#[tokio::test]
async fn test_binds_to_node_with_lowest_value() {
    let h = harness(
        Ok(vec![ready("A"), ready("B"), ready("C")]),
        &[("A", Ok(5.0)), ("B", Ok(3.0)), ("C", Ok(8.0))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    let decision = match outcome {
        AttemptOutcome::Bound(decision) => decision,
        other => panic!("expected a binding, got {other:?}"),
    };
    assert_eq!(decision.target_node, "B");
    assert_eq!(h.metrics.probes.load(Ordering::SeqCst), 3);
    assert_eq!(
        h.binder.recorded(),
        vec![("default".to_string(), Binding::new("pod-a", "B"))]
    );
}

#[tokio::test]
async fn test_only_ready_nodes_are_probed() {
    let h = harness(
        Ok(vec![not_ready("A"), ready("B"), not_ready("C")]),
        &[("A", Ok(0.1)), ("B", Ok(9.0)), ("C", Ok(0.2))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    assert!(matches!(outcome, AttemptOutcome::Bound(ref d) if d.target_node == "B"));
    assert_eq!(h.metrics.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_all_probes_failing_means_no_bind() {
    let h = harness(
        Ok(vec![ready("A"), ready("B")]),
        &[("A", Err(ProbeError::Status(500))), ("B", Ok(f64::INFINITY))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    let err = match outcome {
        AttemptOutcome::Failed(AttemptError::NoCandidate(err)) => err,
        other => panic!("expected no candidate, got {other:?}"),
    };
    assert_eq!(err.probed, 2);
    assert!(h.binder.recorded().is_empty());
}

#[tokio::test]
async fn test_no_ready_nodes_issues_no_probes() {
    let h = harness(
        Ok(vec![not_ready("A")]),
        &[("A", Ok(1.0))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    assert!(matches!(
        outcome,
        AttemptOutcome::Failed(AttemptError::Collect(CollectError::EmptyNodeSet))
    ));
    assert_eq!(h.metrics.probes.load(Ordering::SeqCst), 0);
    assert!(h.binder.recorded().is_empty());
}

#[tokio::test]
async fn test_inventory_failure_abandons_attempt() {
    let h = harness(Err(503), &[], RecordingBinder::default());
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    let err = match outcome {
        AttemptOutcome::Failed(AttemptError::Inventory(err)) => err,
        other => panic!("expected inventory failure, got {other:?}"),
    };
    assert_eq!(err.status(), Some(503));
    assert_eq!(h.metrics.probes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_binding_uses_workload_namespace() {
    let h = harness(
        Ok(vec![ready("node-1")]),
        &[("node-1", Ok(1.0))],
        RecordingBinder::default(),
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let event = WorkloadEvent {
        namespace: Some("shop".to_string()),
        ..pending("pod-a")
    };
    h.scheduler.handle_event(&event, &mut shutdown).await;
    h.scheduler.handle_event(&pending("pod-b"), &mut shutdown).await;

    let namespaces: Vec<String> = h.binder.recorded().into_iter().map(|(ns, _)| ns).collect();
    assert_eq!(namespaces, vec!["shop", "default"]);
}

#[tokio::test]
async fn test_rejected_binding_is_reported() {
    let h = harness(
        Ok(vec![ready("node-1")]),
        &[("node-1", Ok(1.0))],
        RecordingBinder {
            reject_with: Some(409),
            ..RecordingBinder::default()
        },
    );
    let (_tx, mut shutdown) = watch::channel(false);

    let outcome = h.scheduler.handle_event(&pending("pod-a"), &mut shutdown).await;

    let err = match outcome {
        AttemptOutcome::Failed(AttemptError::Bind(err)) => err,
        other => panic!("expected bind failure, got {other:?}"),
    };
    assert_eq!(err.workload, "pod-a");
    assert_eq!(err.node, "node-1");
    assert_eq!(err.source.status(), Some(409));
}

#[tokio::test]
async fn test_run_handles_events_in_order_and_counts_outcomes() {
    let h = harness(
        Ok(vec![ready("A"), ready("B")]),
        &[("A", Ok(2.0)), ("B", Ok(2.0))],
        RecordingBinder::default(),
    );
    let (_tx, shutdown) = watch::channel(false);

    let events = futures_util::stream::iter(vec![
        pending("pod-1"),
        WorkloadEvent {
            phase: "Running".to_string(),
            ..pending("pod-2")
        },
        pending("pod-3"),
        WorkloadEvent {
            scheduler_name: "other".to_string(),
            ..pending("pod-4")
        },
    ]);

    let stats = h.scheduler.run(events, shutdown).await;

    assert_eq!(
        stats,
        RunStats {
            events_seen: 4,
            skipped: 2,
            attempts: 2,
            bound: 2,
            failed: 0,
        }
    );
    let bound: Vec<(String, String)> = h
        .binder
        .recorded()
        .into_iter()
        .map(|(_, b)| (b.metadata.name, b.target.name))
        .collect();
    assert_eq!(
        bound,
        vec![
            ("pod-1".to_string(), "A".to_string()),
            ("pod-3".to_string(), "A".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_failed_attempt_does_not_stop_the_loop() {
    let h = harness(
        Ok(vec![ready("A")]),
        &[("A", Ok(1.0))],
        RecordingBinder {
            reject_with: Some(500),
            ..RecordingBinder::default()
        },
    );
    let (_tx, shutdown) = watch::channel(false);

    let events = futures_util::stream::iter(vec![pending("pod-1"), pending("pod-2")]);
    let stats = h.scheduler.run(events, shutdown).await;

    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(h.binder.recorded().len(), 2);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = harness(Ok(vec![ready("A")]), &[("A", Ok(1.0))], RecordingBinder::default());
    let (tx, shutdown) = watch::channel(false);

    let events = futures_util::stream::pending::<WorkloadEvent>();
    let run = h.scheduler.run(events, shutdown);
    tx.send(true).unwrap();

    let stats = tokio::time::timeout(std::time::Duration::from_secs(1), run)
        .await
        .expect("control loop should stop on shutdown");
    assert_eq!(stats, RunStats::default());
}
