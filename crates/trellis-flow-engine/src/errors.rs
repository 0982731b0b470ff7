//! Error types for flow compilation and execution.

use thiserror::Error;

use crate::types::NodeError;

/// Errors surfaced by flow compilation and execution.
///
/// Every variant is fatal to the run it occurs in. The engine performs no
/// retries; callers decide whether to re-submit.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum FlowError {
    /// The flow definition or engine configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    /// A template referenced something that does not exist.
    #[error("resolution error: {message}")]
    Resolution { message: String },
    /// The dependency graph admits no valid execution order.
    #[error("cycle detected: {message}")]
    Cycle { message: String },
    /// A sub-flow call targeted the currently-executing flow.
    #[error("recursive sub-flow call into flow '{flow_id}'")]
    Recursion { flow_id: String },
    /// A node failed while running.
    #[error("node '{node_id}' failed: {message}")]
    Execution { node_id: String, message: String },
    /// An outbound call failed below the application layer.
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl FlowError {
    /// Wraps a node-level error with the identity of the node that raised it.
    pub fn from_node(node_id: &str, err: NodeError) -> Self {
        match err {
            NodeError::Configuration { message } => Self::Configuration {
                message: format!("node '{node_id}': {message}"),
            },
            NodeError::Execution { message } => Self::Execution {
                node_id: node_id.to_owned(),
                message,
            },
            NodeError::Transport { message } => Self::Transport {
                message: format!("node '{node_id}': {message}"),
            },
            NodeError::Recursion { flow_id } => Self::Recursion { flow_id },
        }
    }
}

/// Errors from [`FlowStore`](crate::traits::FlowStore).
#[derive(Debug, Error)]
pub enum FlowStoreError {
    #[error("flow not found: {flow_id}")]
    NotFound { flow_id: String },
    #[error("flow store error: {message}")]
    Backend { message: String },
}

/// Errors from [`UsageSink`](crate::traits::UsageSink).
#[derive(Debug, Error)]
#[error("usage sink error: {message}")]
pub struct UsageSinkError {
    pub message: String,
}

impl UsageSinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
