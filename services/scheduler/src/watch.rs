//! Pod watch consumer.
//!
//! Keeps a watch open against the orchestrator and yields every decodable
//! workload record, one per line, in arrival order:
//! - Undecodable lines are logged and skipped
//! - A closed or failed connection is re-opened with exponential backoff,
//!   resuming from the last resource version seen
//! - An expired resource version (`410 Gone`) is dropped so the next watch
//!   starts from the current state
//!
//! A connection counts as healthy once it delivers a decodable workload
//! record or bookmark; a watch that only returns an `ERROR` record is a
//! failed attempt. The sequence only ends once `max_reconnect_attempts`
//! consecutive reconnects have failed; with no limit configured it never ends.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use tracing::{debug, error, info, warn};
use tsched_events::{decode_line, WatchRecord, WorkloadEvent};

use crate::backoff::BackoffPolicy;
use crate::error::ApiError;

/// Body of an open watch, read chunk by chunk.
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk of the body, or `None` once the server has closed it.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ApiError>;
}

/// Opens pod watches.
#[async_trait]
pub trait WatchTransport: Send + Sync {
    async fn open(
        &self,
        namespace: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<Box<dyn ChunkStream>, ApiError>;
}

/// Watch consumer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    /// Namespace to watch, or `None` for all namespaces.
    pub namespace: Option<String>,

    /// Delay policy between reconnect attempts.
    pub backoff: BackoffPolicy,

    /// Consecutive failed reconnects tolerated before giving up.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespace: Some(tsched_events::DEFAULT_NAMESPACE.to_string()),
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: None,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No watch has been opened yet.
    Disconnected,
    /// Opening a watch.
    Connecting,
    /// Watch open, reading records.
    Streaming,
    /// Waiting before the next reconnect attempt.
    BackoffWait,
    /// Gave up reconnecting. No more events will be produced.
    Terminated,
}

/// Consumes a pod watch, reconnecting as needed.
pub struct PodWatcher<T> {
    transport: T,
    config: WatchConfig,
    state: WatchState,
    body: Option<Box<dyn ChunkStream>>,
    buffer: BytesMut,
    resource_version: Option<String>,
    consecutive_failures: u32,
    decode_failures: u64,
}

impl<T: WatchTransport> PodWatcher<T> {
    pub fn new(transport: T, config: WatchConfig) -> Self {
        Self {
            transport,
            config,
            state: WatchState::Disconnected,
            body: None,
            buffer: BytesMut::new(),
            resource_version: None,
            consecutive_failures: 0,
            decode_failures: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Resource version the next watch will resume from.
    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// Number of records skipped because they could not be decoded.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Wait for the next workload record.
    ///
    /// Returns `None` only after the watcher has terminated.
    pub async fn next_event(&mut self) -> Option<WorkloadEvent> {
        loop {
            if let Some(line) = self.take_line() {
                if let Some(event) = self.handle_line(&line) {
                    return Some(event);
                }
                continue;
            }

            match self.state {
                WatchState::Terminated => return None,
                WatchState::Disconnected | WatchState::Connecting => self.connect().await,
                WatchState::Streaming => self.read_chunk().await,
                WatchState::BackoffWait => {
                    let delay = self.config.backoff.delay(self.consecutive_failures);
                    info!(
                        attempt = self.consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling watch reconnect"
                    );
                    tokio::time::sleep(delay).await;
                    self.connect().await;
                }
            }
        }
    }

    /// Turn the watcher into a stream of workload events.
    pub fn into_stream(self) -> impl Stream<Item = WorkloadEvent> + Send
    where
        T: 'static,
    {
        futures_util::stream::unfold(self, |mut watcher| async move {
            let event = watcher.next_event().await?;
            Some((event, watcher))
        })
    }

    async fn connect(&mut self) {
        self.state = WatchState::Connecting;
        let namespace = self.config.namespace.as_deref();

        info!(
            namespace = namespace.unwrap_or("*"),
            resource_version = ?self.resource_version,
            "Opening watch"
        );

        match self
            .transport
            .open(namespace, self.resource_version.as_deref())
            .await
        {
            Ok(body) => {
                self.body = Some(body);
                self.buffer.clear();
                self.state = WatchState::Streaming;
                info!(namespace = namespace.unwrap_or("*"), "Watch connected");
            }
            Err(e) => {
                if e.status() == Some(410) {
                    self.resource_version = None;
                }
                self.disconnected(format!("open failed: {e}"));
            }
        }
    }

    async fn read_chunk(&mut self) {
        let Some(body) = self.body.as_mut() else {
            self.disconnected("no open watch body".to_string());
            return;
        };

        match body.next_chunk().await {
            Ok(Some(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
            }
            Ok(None) => {
                // Keep a final record the server did not newline-terminate.
                if !self.buffer.is_empty() && !self.buffer.ends_with(b"\n") {
                    self.buffer.extend_from_slice(b"\n");
                }
                self.body = None;
                self.disconnected("stream closed by server".to_string());
            }
            Err(e) => {
                self.buffer.clear();
                self.disconnected(format!("read failed: {e}"));
            }
        }
    }

    fn disconnected(&mut self, reason: String) {
        self.body = None;
        self.consecutive_failures += 1;

        if let Some(max) = self.config.max_reconnect_attempts {
            if self.consecutive_failures > max {
                error!(
                    reason = %reason,
                    consecutive_failures = self.consecutive_failures,
                    "Watch terminated, giving up on reconnecting"
                );
                self.state = WatchState::Terminated;
                return;
            }
        }

        if self.consecutive_failures > 3 {
            error!(
                reason = %reason,
                consecutive_failures = self.consecutive_failures,
                "Watch disconnected repeatedly"
            );
        } else {
            warn!(
                reason = %reason,
                consecutive_failures = self.consecutive_failures,
                "Watch disconnected"
            );
        }
        self.state = WatchState::BackoffWait;
    }

    fn take_line(&mut self) -> Option<BytesMut> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        Some(line)
    }

    fn handle_line(&mut self, line: &[u8]) -> Option<WorkloadEvent> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }

        match decode_line(line) {
            Ok(WatchRecord::Workload(event)) => {
                self.consecutive_failures = 0;
                if let Some(rv) = &event.resource_version {
                    self.resource_version = Some(rv.clone());
                }
                debug!(
                    change_type = %event.change_type,
                    workload = %event.name,
                    phase = %event.phase,
                    "Received workload event"
                );
                Some(event)
            }
            Ok(WatchRecord::Bookmark { resource_version }) => {
                self.consecutive_failures = 0;
                debug!(resource_version = ?resource_version, "Received bookmark");
                if resource_version.is_some() {
                    self.resource_version = resource_version;
                }
                None
            }
            Ok(WatchRecord::Error(status)) => {
                if status.is_expired() {
                    warn!(status = %status, "Resource version expired, resuming from current state");
                    self.resource_version = None;
                }
                self.buffer.clear();
                self.disconnected(format!("server error: {status}"));
                None
            }
            Err(e) => {
                self.decode_failures += 1;
                warn!(error = %e, "Skipping undecodable watch record");
                None
            }
        }
    }
}
