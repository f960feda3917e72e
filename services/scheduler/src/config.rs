//! Configuration for the scheduler.
//!
//! Flags take precedence over environment variables. The parsed [`Cli`] is
//! validated once into an immutable [`Config`] that is handed to each
//! component constructor.
//!
//! API server credentials come from the first of: `--kubeconfig` (or
//! `KUBECONFIG`), the in-cluster service account, `~/.kube/config`. The
//! individual `--api-server`, `--api-token-file`, `--ca-cert` and
//! `--client-cert`/`--client-key` flags override whatever that source set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};

use crate::backoff::BackoffPolicy;
use crate::collector::CollectorConfig;
use crate::kube::ApiConfig;
use crate::kubeconfig::{self, Kubeconfig};
use crate::telemetry::TelemetryConfig;
use crate::watch::WatchConfig;

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

/// tsched - place pending workloads on the node with the best live metric.
#[derive(Debug, Clone, Parser)]
#[command(name = "tsched")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Scheduler name workloads must request to be handled here.
    #[arg(short = 's', long, env = "TSCHED_SCHEDULER_NAME")]
    pub scheduler_name: String,

    /// Metric identifier to minimise (e.g. net.request.time).
    #[arg(short = 'm', long, env = "TSCHED_METRIC")]
    pub metric: String,

    /// Telemetry backend base URL.
    #[arg(long, env = "TSCHED_TELEMETRY_URL", default_value = "https://app.sysdigcloud.com")]
    pub telemetry_url: String,

    /// Telemetry backend API token.
    #[arg(short = 't', long, env = "TSCHED_TELEMETRY_TOKEN", hide_env_values = true)]
    pub telemetry_token: String,

    /// Time aggregation applied over the query window.
    #[arg(long, env = "TSCHED_TIME_AGGREGATION", default_value = "timeAvg")]
    pub time_aggregation: String,

    /// Group aggregation applied across the host's series.
    #[arg(long, env = "TSCHED_GROUP_AGGREGATION", default_value = "avg")]
    pub group_aggregation: String,

    /// Length of the trailing query window, in seconds.
    #[arg(long, env = "TSCHED_WINDOW_SECS", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub window_secs: u64,

    /// Sampling interval of the query, in seconds.
    #[arg(long, env = "TSCHED_SAMPLING_SECS", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub sampling_secs: u64,

    /// Deadline for a single node probe, in milliseconds.
    #[arg(long, env = "TSCHED_PROBE_TIMEOUT_MS", default_value_t = 5000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout_ms: u64,

    /// Upper bound on probes in flight at once.
    #[arg(long, env = "TSCHED_MAX_CONCURRENT_PROBES", default_value_t = 64,
          value_parser = clap::value_parser!(u64).range(1..=4096))]
    pub max_concurrent_probes: u64,

    /// kubeconfig file to take the API server and credentials from.
    #[arg(short = 'k', long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// kubeconfig context to use instead of its current-context.
    #[arg(long, env = "TSCHED_CONTEXT")]
    pub context: Option<String>,

    /// Orchestrator API server URL.
    #[arg(long, env = "TSCHED_API_SERVER")]
    pub api_server: Option<String>,

    /// File holding a bearer token for the API server.
    #[arg(long, env = "TSCHED_API_TOKEN_FILE")]
    pub api_token_file: Option<PathBuf>,

    /// PEM bundle used to verify the API server certificate.
    #[arg(long, env = "TSCHED_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// PEM client certificate for the API server.
    #[arg(long, env = "TSCHED_CLIENT_CERT", requires = "client_key")]
    pub client_cert: Option<PathBuf>,

    /// PEM private key matching --client-cert.
    #[arg(long, env = "TSCHED_CLIENT_KEY", requires = "client_cert")]
    pub client_key: Option<PathBuf>,

    /// Namespace to watch for pending workloads.
    #[arg(short = 'n', long, env = "TSCHED_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Watch every namespace instead of --namespace.
    #[arg(long, env = "TSCHED_ALL_NAMESPACES")]
    pub all_namespaces: bool,

    /// First reconnect delay, in milliseconds.
    #[arg(long, env = "TSCHED_RECONNECT_BASE_MS", default_value_t = 500,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub reconnect_base_ms: u64,

    /// Reconnect delay cap, in milliseconds.
    #[arg(long, env = "TSCHED_RECONNECT_MAX_MS", default_value_t = 30_000,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub reconnect_max_ms: u64,

    /// Give up after this many consecutive failed reconnects (unbounded if unset).
    #[arg(long, env = "TSCHED_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Log output format.
    #[arg(long, env = "TSCHED_LOG_FORMAT", value_enum, default_value = "json")]
    pub log_format: LogFormat,
}

/// Validated scheduler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scheduler name matched against each workload's requested scheduler.
    pub scheduler_name: String,

    pub api: ApiConfig,

    pub telemetry: TelemetryConfig,

    pub collector: CollectorConfig,

    pub watch: WatchConfig,

    pub log_format: LogFormat,
}

impl Cli {
    /// Validate the arguments and load credential files.
    pub fn into_config(self) -> Result<Config> {
        ensure!(
            !self.scheduler_name.trim().is_empty(),
            "scheduler name must not be empty"
        );
        ensure!(!self.metric.trim().is_empty(), "metric must not be empty");
        ensure!(
            !self.telemetry_token.trim().is_empty(),
            "telemetry token must not be empty"
        );
        ensure!(
            self.reconnect_base_ms <= self.reconnect_max_ms,
            "--reconnect-base-ms must not exceed --reconnect-max-ms"
        );

        let api = self.api_config()?;

        let namespace = if self.all_namespaces {
            None
        } else {
            ensure!(!self.namespace.is_empty(), "namespace must not be empty");
            Some(self.namespace)
        };

        Ok(Config {
            scheduler_name: self.scheduler_name,
            api,
            telemetry: TelemetryConfig {
                url: self.telemetry_url.trim_end_matches('/').to_string(),
                token: self.telemetry_token,
                metric: self.metric,
                time_aggregation: self.time_aggregation,
                group_aggregation: self.group_aggregation,
                window: Duration::from_secs(self.window_secs),
                sampling: Duration::from_secs(self.sampling_secs),
            },
            collector: CollectorConfig {
                probe_timeout: Duration::from_millis(self.probe_timeout_ms),
                max_in_flight: self.max_concurrent_probes as usize,
            },
            watch: WatchConfig {
                namespace,
                backoff: BackoffPolicy {
                    base: Duration::from_millis(self.reconnect_base_ms),
                    max: Duration::from_millis(self.reconnect_max_ms),
                    ..BackoffPolicy::default()
                },
                max_reconnect_attempts: self.max_reconnect_attempts,
            },
            log_format: self.log_format,
        })
    }
}

impl Cli {
    fn api_config(&self) -> Result<ApiConfig> {
        let mut api = match self.kubeconfig_path() {
            Some(path) => Kubeconfig::load(&path)
                .and_then(|kubeconfig| kubeconfig.resolve(self.context.as_deref()))
                .with_context(|| format!("Failed to load kubeconfig {}", path.display()))?,
            None => {
                ensure!(self.context.is_none(), "--context requires a kubeconfig");
                ApiConfig {
                    token: default_path(SERVICE_ACCOUNT_TOKEN).map(read_token).transpose()?,
                    ca_cert_pem: default_path(SERVICE_ACCOUNT_CA).map(read_file).transpose()?,
                    ..ApiConfig::default()
                }
            }
        };

        if let Some(server) = &self.api_server {
            api.server_url = server.trim_end_matches('/').to_string();
        }
        if let Some(path) = &self.api_token_file {
            api.token = Some(read_token(path)?);
        }
        if let Some(path) = &self.ca_cert {
            api.ca_cert_pem = Some(read_file(path)?);
        }
        if let (Some(cert), Some(key)) = (&self.client_cert, &self.client_key) {
            let mut pem = read_file(cert)?;
            pem.push(b'\n');
            pem.extend(read_file(key)?);
            api.identity_pem = Some(pem);
        }

        Ok(api)
    }

    /// An explicit kubeconfig wins; the home one is only used out of cluster.
    fn kubeconfig_path(&self) -> Option<PathBuf> {
        if let Some(paths) = &self.kubeconfig {
            // KUBECONFIG may hold a list; only its first entry is read.
            return std::env::split_paths(paths).find(|p| !p.as_os_str().is_empty());
        }
        if default_path(SERVICE_ACCOUNT_TOKEN).is_some() {
            return None;
        }
        kubeconfig::default_path().filter(|path| path.exists())
    }
}

fn default_path(path: &'static str) -> Option<&'static Path> {
    let path = Path::new(path);
    path.exists().then_some(path)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_token(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    let token = raw.trim();
    ensure!(!token.is_empty(), "token file {} is empty", path.display());
    Ok(token.to_string())
}
