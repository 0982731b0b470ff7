//! Engine facade — the single entry point for embedding the flow engine.
//!
//! [`FlowEngine`] assembles the node registry, flow store, executor, and
//! sinks into one value. Construct via [`FlowEngine::builder()`].
//!
//! ```rust,ignore
//! let engine = FlowEngine::builder()
//!     .node(MyLlmNodeFactory::new(provider))
//!     .flow_store(my_store)
//!     .subflow(SubflowConfig::new("https://flows.internal"))
//!     .build();
//!
//! let outcome = engine
//!     .execute("my-flow", ExecutionRequest::new("hello"))
//!     .await?;
//! ```

mod builder;

pub use builder::FlowEngineBuilder;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::FlowError;
use crate::executor::{ExecutionRequest, FlowExecutor};
use crate::node_ctx::{ExecutionContext, NodeCtx};
use crate::registry::NodeRegistry;
use crate::traits::FlowStore;
use crate::types::execution::{FlowRunOutcome, RuntimeState};
use crate::types::{NodeTypeMeta, OptionItem, StoredFlow};

/// The assembled engine.
///
/// Cheap to share: all collaborators are `Arc`-wrapped, and every operation
/// takes `&self`.
pub struct FlowEngine {
    pub(super) registry: Arc<NodeRegistry>,
    pub(super) flow_store: Arc<dyn FlowStore>,
    pub(super) executor: Arc<FlowExecutor>,
    /// Engine-level variables, available to every execution unless the
    /// request shadows them.
    pub(super) variables: BTreeMap<String, Value>,
    pub(super) http: reqwest::Client,
}

impl FlowEngine {
    /// Create a new [`FlowEngineBuilder`].
    pub fn builder() -> FlowEngineBuilder {
        FlowEngineBuilder::new()
    }

    /// Load a flow from the store and execute it.
    pub async fn execute(
        &self,
        flow_id: &str,
        request: ExecutionRequest,
    ) -> Result<FlowRunOutcome, FlowError> {
        let flow = self
            .flow_store
            .load(flow_id)
            .await
            .map_err(|err| FlowError::Configuration {
                message: err.to_string(),
            })?;
        self.execute_flow(&flow, request).await
    }

    /// Execute a caller-supplied flow directly, bypassing the store.
    pub async fn execute_flow(
        &self,
        flow: &StoredFlow,
        mut request: ExecutionRequest,
    ) -> Result<FlowRunOutcome, FlowError> {
        for (name, value) in &self.variables {
            request
                .variables
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self.executor.execute(flow, request).await
    }

    /// Metadata for every registered node type, sorted by type name.
    pub fn node_catalog(&self) -> Vec<NodeTypeMeta> {
        self.registry.catalog()
    }

    /// Access the node registry.
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Access the flow store.
    pub fn flow_store(&self) -> &Arc<dyn FlowStore> {
        &self.flow_store
    }

    /// Ask a node type for its dynamic options (model lists, table names).
    ///
    /// Node types without the option capability return an empty list rather
    /// than an error, so a UI can probe every type uniformly.
    pub async fn load_node_options(
        &self,
        node_type: &str,
        method: &str,
        inputs: &Value,
    ) -> Result<Vec<OptionItem>, FlowError> {
        let runtime = self.executor.loader().load(node_type).await?;
        let Some(provider) = runtime.options() else {
            return Ok(Vec::new());
        };

        // Options load outside any execution; the context carries identity
        // and the shared client, nothing else.
        let (usage_tx, _usage_rx) = mpsc::channel(1);
        let ctx = NodeCtx::new(
            ExecutionContext::new("option-load"),
            node_type.to_owned(),
            node_type.to_owned(),
            String::new(),
            Vec::new(),
            RuntimeState::new(),
            usage_tx,
            self.http.clone(),
        );
        provider
            .load_options(method, inputs, &ctx)
            .await
            .map_err(|err| FlowError::from_node(node_type, err))
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("node_types", &self.registry.len())
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
