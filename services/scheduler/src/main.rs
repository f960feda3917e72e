//! tsched
//!
//! Watches the orchestrator for pending workloads that request this scheduler
//! and binds each one to the ready node reporting the lowest value of a
//! configured live metric.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tsched_scheduler::{
    Binder, Cli, KubeClient, LogFormat, PodWatcher, Scheduler, TelemetryClient, TelemetryCollector,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting tsched");
    info!(
        scheduler_name = %config.scheduler_name,
        metric = %config.telemetry.metric,
        api_server = %config.api.server_url,
        telemetry_url = %config.telemetry.url,
        namespace = config.watch.namespace.as_deref().unwrap_or("*"),
        max_in_flight = config.collector.max_in_flight,
        probe_timeout_ms = config.collector.probe_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let kube = KubeClient::new(&config.api).context("Failed to build API server client")?;
    let telemetry =
        TelemetryClient::new(config.telemetry.clone()).context("Failed to build telemetry client")?;

    let collector = TelemetryCollector::new(Arc::new(telemetry), config.collector.clone());
    let scheduler = Scheduler::new(
        config.scheduler_name.clone(),
        kube.clone(),
        collector,
        Binder::new(kube.clone()),
    );
    let events = PodWatcher::new(kube, config.watch.clone()).into_stream();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut control_loop =
        tokio::spawn(async move { scheduler.run(events, shutdown_rx).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut control_loop => {
            match result {
                Ok(stats) => {
                    error!(bound = stats.bound, failed = stats.failed, "Control loop exited");
                    bail!("pod watch terminated");
                }
                Err(e) => {
                    error!(error = %e, "Control loop task panicked");
                    bail!("control loop task failed: {e}");
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for control loop to shut down...");
    match tokio::time::timeout(SHUTDOWN_GRACE, control_loop).await {
        Ok(Ok(stats)) => info!(
            events_seen = stats.events_seen,
            bound = stats.bound,
            failed = stats.failed,
            "Control loop stopped"
        ),
        Ok(Err(e)) => error!(error = %e, "Control loop task panicked"),
        Err(_) => warn!("Control loop did not stop within the grace period"),
    }

    info!("tsched shutdown complete");
    Ok(())
}
