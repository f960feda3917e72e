//! Submits placement decisions to the orchestrator.

use async_trait::async_trait;
use tracing::info;
use tsched_events::Binding;

use crate::decision::PlacementDecision;
use crate::error::{ApiError, BindError};

/// Orchestrator endpoint that accepts bindings.
#[async_trait]
pub trait BindingApi: Send + Sync {
    async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<(), ApiError>;
}

/// Turns a [`PlacementDecision`] into a binding request.
///
/// The request is sent once. Whether the workload actually starts on the
/// node is left to the orchestrator.
pub struct Binder<B> {
    api: B,
}

impl<B: BindingApi> Binder<B> {
    pub fn new(api: B) -> Self {
        Self { api }
    }

    pub async fn bind(&self, decision: &PlacementDecision) -> Result<(), BindError> {
        let namespace = decision.namespace();
        let binding = Binding::new(&decision.workload_name, &decision.target_node);

        self.api
            .create_binding(namespace, &binding)
            .await
            .map_err(|source| BindError {
                workload: decision.workload_name.clone(),
                node: decision.target_node.clone(),
                namespace: namespace.to_string(),
                source,
            })?;

        info!(
            workload = %decision.workload_name,
            namespace = %namespace,
            node = %decision.target_node,
            "Workload bound"
        );
        Ok(())
    }
}
