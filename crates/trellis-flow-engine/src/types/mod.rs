//! Core data types shared across the engine.
//!
//! Everything here is serializable: stored flows arrive as JSON from
//! external storage, and node errors may cross a process boundary when a
//! sub-flow reports back.

pub mod execution;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version stamped on stored flows.
pub const FLOW_SCHEMA_VERSION: u16 = 1;

/// Node category used for decorative annotations (sticky notes, comments).
/// Nodes in this category never count as ending nodes and carry no runtime.
pub const ANNOTATION_CATEGORY: &str = "annotation";

fn default_schema_version() -> u16 {
    FLOW_SCHEMA_VERSION
}

// ---------------------------------------------------------------------------
// Flow graph types
// ---------------------------------------------------------------------------

/// A node instance inside a stored flow.
///
/// `inputs` holds the declared input fields exactly as authored: each value
/// may be a literal, a `{{...}}` reference, or a mix of both inside a string
/// template. References are resolved per execution by the variable resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    /// Logical type name, resolved against the node registry.
    pub node_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            category: String::new(),
            inputs: serde_json::Map::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Whether this node is purely decorative (never scheduled, never an
    /// ending node).
    pub fn is_annotation(&self) -> bool {
        self.category == ANNOTATION_CATEGORY
    }
}

/// A directed edge between two node anchors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub source: String,
    #[serde(default)]
    pub source_anchor: String,
    pub target: String,
    #[serde(default)]
    pub target_anchor: String,
}

impl FlowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_anchor: String::new(),
            target: target.into(),
            target_anchor: String::new(),
        }
    }
}

/// A flow as handed over by external storage: already-deserialized node and
/// edge arrays. The engine never writes flows back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFlow {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

impl StoredFlow {
    pub fn new(id: impl Into<String>, nodes: Vec<FlowNode>, edges: Vec<FlowEdge>) -> Self {
        Self {
            schema_version: FLOW_SCHEMA_VERSION,
            id: id.into(),
            name: String::new(),
            nodes,
            edges,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry metadata
// ---------------------------------------------------------------------------

/// Registry entry metadata for a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeMeta {
    /// Stable string id the registry keys on.
    pub node_type: String,
    pub label: String,
    pub category: String,
    /// Declared input schema (JSON-schema fragment, advisory).
    #[serde(default)]
    pub input_schema: Value,
}

/// One selectable option produced by a node's option provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Chat history
// ---------------------------------------------------------------------------

/// Message role in the chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One turn of the conversation threaded through an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node errors
// ---------------------------------------------------------------------------

/// Errors a node runtime can return. The executor attaches node identity
/// when wrapping one into a run-level [`FlowError`](crate::errors::FlowError).
///
/// All variants are fatal to the current run; the engine retries nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
#[non_exhaustive]
pub enum NodeError {
    /// A required selection or input field is missing or malformed.
    Configuration { message: String },
    /// The node's own logic failed.
    Execution { message: String },
    /// An outbound call failed at the transport layer.
    Transport { message: String },
    /// A sub-flow call targeted the flow that is currently executing.
    Recursion { flow_id: String },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { message } => write!(f, "configuration error: {message}"),
            Self::Execution { message } => write!(f, "execution failed: {message}"),
            Self::Transport { message } => write!(f, "transport failure: {message}"),
            Self::Recursion { flow_id } => {
                write!(f, "sub-flow recursion: flow '{flow_id}' cannot invoke itself")
            }
        }
    }
}

impl std::error::Error for NodeError {}
