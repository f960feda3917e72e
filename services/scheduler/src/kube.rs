//! Orchestrator API client.
//!
//! Provides the three calls the scheduler makes against the API server:
//! - Listing nodes for the inventory snapshot
//! - Opening a pod watch
//! - Creating bindings

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response};
use tracing::debug;
use tsched_events::{Binding, NodeList, NodeRef};

use crate::binder::BindingApi;
use crate::error::ApiError;
use crate::scheduler::NodeInventory;
use crate::watch::{ChunkStream, WatchTransport};

/// Connection settings for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL, without a trailing slash.
    pub server_url: String,

    /// Bearer token, if the server expects one.
    pub token: Option<String>,

    /// Extra trust roots in PEM form.
    pub ca_cert_pem: Option<Vec<u8>>,

    /// Client certificate followed by its private key, in PEM form.
    pub identity_pem: Option<Vec<u8>>,

    pub connect_timeout: Duration,

    /// Timeout for list and bind requests. Watches are not bounded.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            server_url: "https://kubernetes.default.svc".to_string(),
            token: None,
            ca_cert_pem: None,
            identity_pem: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("server_url", &self.server_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_cert", &self.ca_cert_pem.is_some())
            .field("client_identity", &self.identity_pem.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Orchestrator API client.
#[derive(Clone)]
pub struct KubeClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl KubeClient {
    /// Build a client from connection settings.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);

        if let Some(pem) = &config.ca_cert_pem {
            for cert in reqwest::Certificate::from_pem_bundle(pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Some(pem) = &config.identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(pem)?);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.server_url.clone(),
            token: config.token.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List all nodes.
    pub async fn list_nodes(&self) -> Result<Vec<NodeRef>, ApiError> {
        debug!("Listing nodes");

        let response = self
            .request(Method::GET, "/api/v1/nodes")
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;

        let list: NodeList =
            serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(list.into_refs())
    }

    /// Submit a binding in `namespace`.
    pub async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<(), ApiError> {
        let path = format!("/api/v1/namespaces/{namespace}/bindings");
        debug!(path = %path, workload = %binding.metadata.name, node = %binding.target.name, "Creating binding");

        let response = self
            .request(Method::POST, &path)
            .timeout(self.request_timeout)
            .json(binding)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Open a pod watch, in one namespace or cluster-wide.
    pub async fn watch_pods(
        &self,
        namespace: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<Response, ApiError> {
        let path = match namespace {
            Some(ns) => format!("/api/v1/namespaces/{ns}/pods"),
            None => "/api/v1/pods".to_string(),
        };

        let mut query = vec![("watch", "true"), ("allowWatchBookmarks", "true")];
        if let Some(rv) = resource_version {
            query.push(("resourceVersion", rv));
        }

        debug!(path = %path, resource_version = ?resource_version, "Opening pod watch");

        let response = self.request(Method::GET, &path).query(&query).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

#[async_trait]
impl NodeInventory for KubeClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRef>, ApiError> {
        KubeClient::list_nodes(self).await
    }
}

#[async_trait]
impl BindingApi for KubeClient {
    async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<(), ApiError> {
        KubeClient::create_binding(self, namespace, binding).await
    }
}

#[async_trait]
impl WatchTransport for KubeClient {
    async fn open(
        &self,
        namespace: Option<&str>,
        resource_version: Option<&str>,
    ) -> Result<Box<dyn ChunkStream>, ApiError> {
        let response = self.watch_pods(namespace, resource_version).await?;
        Ok(Box::new(response))
    }
}

#[async_trait]
impl ChunkStream for Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, ApiError> {
        Ok(self.chunk().await?)
    }
}
