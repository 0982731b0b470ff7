//! Plugin trait interfaces for the flow engine.
//!
//! Node implementations plug in through [`NodeFactory`] and [`NodeRuntime`];
//! everything else the engine talks to at run time (flow storage, token
//! streaming, usage accounting, error sanitizing) is an async trait with a
//! default implementation under `defaults/`. Adding a method to any trait
//! requires a default implementation to preserve backward compatibility.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{FlowStoreError, UsageSinkError};
use crate::node_ctx::NodeCtx;
use crate::types::execution::{NodeOutput, UsageReport};
use crate::types::{NodeError, NodeTypeMeta, OptionItem, StoredFlow};

// ---------------------------------------------------------------------------
// NodeFactory / NodeRuntime
// ---------------------------------------------------------------------------

/// Compile-time registration unit for a node type.
///
/// Factories are registered once at engine construction; lookup failures are
/// configuration errors, never dynamic-load errors. `instantiate()` is called
/// at most once per node type per execution (or less, when the caller wires
/// in a runtime cache).
pub trait NodeFactory: Send + Sync {
    /// Static metadata: type id, label, category, declared input schema.
    fn meta(&self) -> NodeTypeMeta;

    /// Builds a fresh runtime for this node type.
    fn instantiate(&self) -> Arc<dyn NodeRuntime>;
}

/// An opaque handle produced by [`NodeRuntime::init`] and handed back to the
/// same runtime's `run` through the node context.
///
/// Runtimes downcast it to whatever concrete type they stored.
#[derive(Clone)]
pub struct InitHandle(Arc<dyn Any + Send + Sync>);

impl InitHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for InitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InitHandle(..)")
    }
}

/// Executable behavior of one node type.
///
/// The executor drives the optional capabilities only when present: `init`
/// runs before `run` with the same resolved inputs, `options()` backs
/// editor-time option loading, and `arg_transformer()` post-processes
/// resolved inputs before they reach `init`/`run`.
#[async_trait]
pub trait NodeRuntime: Send + Sync {
    /// Optional pre-run initialization. The returned handle, if any, is
    /// available to `run` via [`NodeCtx::init_handle`].
    async fn init(&self, inputs: &Value, ctx: &NodeCtx) -> Result<Option<InitHandle>, NodeError> {
        let _ = (inputs, ctx);
        Ok(None)
    }

    /// Executes the node with fully-resolved inputs.
    async fn run(&self, inputs: Value, ctx: &NodeCtx) -> Result<NodeOutput, NodeError>;

    /// Editor-facing option loading, when this node type supports it.
    fn options(&self) -> Option<&dyn OptionProvider> {
        None
    }

    /// Input post-processing, when this node type needs it.
    fn arg_transformer(&self) -> Option<&dyn ArgTransformer> {
        None
    }
}

/// Loads selectable options for a node input (model lists, table names).
#[async_trait]
pub trait OptionProvider: Send + Sync {
    async fn load_options(
        &self,
        method: &str,
        inputs: &Value,
        ctx: &NodeCtx,
    ) -> Result<Vec<OptionItem>, NodeError>;
}

/// Rewrites resolved inputs before a node runs.
///
/// Typical use: parsing escaped JSON arguments a tool call produced into
/// structured values.
pub trait ArgTransformer: Send + Sync {
    fn transform_args(&self, inputs: &Value) -> Result<Value, NodeError>;
}

// ---------------------------------------------------------------------------
// FlowStore
// ---------------------------------------------------------------------------

/// Where flow definitions come from.
///
/// The engine only reads; persistence and versioning belong to the caller.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn load(&self, flow_id: &str) -> Result<StoredFlow, FlowStoreError>;
}

// ---------------------------------------------------------------------------
// StreamSink
// ---------------------------------------------------------------------------

/// Where streamed tokens go.
///
/// Delivery is best-effort and infallible from the engine's point of view;
/// implementations log their own failures.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn stream_token(&self, chat_id: &str, token: &str);
}

// ---------------------------------------------------------------------------
// UsageSink
// ---------------------------------------------------------------------------

/// Where usage accounting records go.
///
/// The executor submits reports asynchronously after each node finishes; a
/// sink failure is logged and never fails the run.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, report: UsageReport) -> Result<(), UsageSinkError>;
}

// ---------------------------------------------------------------------------
// ErrorSanitizer
// ---------------------------------------------------------------------------

/// Scrubs failure messages before they leave the engine.
///
/// The full message is logged internally first; only the sanitized form is
/// surfaced to callers and streamed to clients.
pub trait ErrorSanitizer: Send + Sync {
    fn sanitize(&self, message: &str) -> String;
}
