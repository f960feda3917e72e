//! Telemetry backend client.
//!
//! Issues one aggregated metric query scoped to a single host:
//!
//! ```text
//! POST /api/data
//! {"metrics":[{"id":"net.request.time","aggregations":{"time":"timeAvg","group":"avg"}}],
//!  "dataSourceType":"host","start":-60,"end":0,"sampling":60,
//!  "filter":"host.hostName = 'node-1'"}
//! ```
//!
//! The first value of the first sample in the response is the node's metric.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::MetricSource;
use crate::error::ProbeError;

/// Query settings for the telemetry backend.
#[derive(Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Base URL, without a trailing slash.
    pub url: String,

    pub token: String,

    /// Metric identifier to query.
    pub metric: String,

    pub time_aggregation: String,

    pub group_aggregation: String,

    /// Trailing window the aggregate is computed over.
    pub window: Duration,

    pub sampling: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: "https://app.sysdigcloud.com".to_string(),
            token: String::new(),
            metric: String::new(),
            time_aggregation: "timeAvg".to_string(),
            group_aggregation: "avg".to_string(),
            window: Duration::from_secs(60),
            sampling: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("metric", &self.metric)
            .field("time_aggregation", &self.time_aggregation)
            .field("group_aggregation", &self.group_aggregation)
            .field("window", &self.window)
            .field("sampling", &self.sampling)
            .finish()
    }
}

/// Body of a data query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    pub metrics: Vec<MetricSpec>,
    pub data_source_type: String,
    pub start: i64,
    pub end: i64,
    pub sampling: u64,
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSpec {
    pub id: String,
    pub aggregations: Aggregations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregations {
    pub time: String,
    pub group: String,
}

/// Response of a data query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub data: Vec<DataSample>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSample {
    #[serde(default)]
    pub d: Vec<Option<f64>>,
}

impl DataResponse {
    /// First value of the first sample, if the backend returned one.
    pub fn first_value(&self) -> Option<f64> {
        self.data.first()?.d.first().copied().flatten()
    }
}

/// Filter expression selecting a single host.
pub fn host_filter(node: &str) -> String {
    format!("host.hostName = '{}'", node.replace('\'', "\\'"))
}

/// Telemetry backend client.
#[derive(Clone)]
pub struct TelemetryClient {
    client: reqwest::Client,
    config: TelemetryConfig,
}

impl TelemetryClient {
    pub fn new(config: TelemetryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    /// Build the query for one node.
    pub fn query_for(&self, node: &str) -> DataRequest {
        DataRequest {
            metrics: vec![MetricSpec {
                id: self.config.metric.clone(),
                aggregations: Aggregations {
                    time: self.config.time_aggregation.clone(),
                    group: self.config.group_aggregation.clone(),
                },
            }],
            data_source_type: "host".to_string(),
            start: -(self.config.window.as_secs() as i64),
            end: 0,
            sampling: self.config.sampling.as_secs(),
            filter: host_filter(node),
        }
    }

    /// Fetch the metric value for one node.
    pub async fn fetch(&self, node: &str) -> Result<f64, ProbeError> {
        let url = format!("{}/api/data", self.config.url);
        let request = self.query_for(node);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        let data: DataResponse =
            serde_json::from_slice(&body).map_err(|e| ProbeError::Decode(e.to_string()))?;

        let value = data.first_value().ok_or(ProbeError::NoData)?;
        if !value.is_finite() {
            return Err(ProbeError::NonFinite(value));
        }

        debug!(node = %node, metric = %self.config.metric, value, "Fetched node metric");
        Ok(value)
    }
}

#[async_trait]
impl MetricSource for TelemetryClient {
    async fn node_metric(&self, node: &str) -> Result<f64, ProbeError> {
        self.fetch(node).await
    }
}
