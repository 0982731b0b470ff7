//! Execution-time data: node phases, runtime state, usage accounting, and
//! the structured output envelope nodes hand back to the executor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChatMessage;

/// Lifecycle phase of a node within one execution.
///
/// Transitions are strictly forward: `Pending` to `InputResolved` to
/// `Running`, then exactly one of `Succeeded` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Pending,
    InputResolved,
    Running,
    Succeeded,
    Failed,
}

/// Accumulated key/value state for one execution.
///
/// Backed by a `BTreeMap` so serialized snapshots are deterministic. Nodes
/// never mutate this directly; they return a [`StatePatch`] and the executor
/// merges patches at tier boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeState {
    entries: BTreeMap<String, Value>,
}

/// A set of state writes produced by a single node run.
pub type StatePatch = BTreeMap<String, Value>;

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Applies a patch, later writes winning over existing keys.
    pub fn merge_patch(&mut self, patch: StatePatch) {
        for (k, v) in patch {
            self.entries.insert(k, v);
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

/// Token counts for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A usage event recorded by a node mid-run. The executor decorates these
/// with execution identity before handing them to the usage sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub success: bool,
}

/// Fully-attributed usage record emitted to the usage sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub request_id: String,
    pub execution_id: String,
    pub org_id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub processing_time_ms: u64,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Node output envelope
// ---------------------------------------------------------------------------

/// Structured result of one node run.
///
/// `content` is the primary output other nodes reference. The optional
/// sections carry auxiliary payloads that legacy nodes used to pack into a
/// single delimited string; [`crate::payload::normalize_output`] upgrades
/// such strings into this envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_patch: StatePatch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat_delta: Vec<ChatMessage>,
}

impl NodeOutput {
    /// Plain-text output with no auxiliary sections.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Value::String(content.into()),
            ..Self::default()
        }
    }

    /// Structured output with no auxiliary sections.
    pub fn json(content: Value) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_patch.insert(key.into(), value);
        self
    }

    pub fn with_chat_delta(mut self, delta: Vec<ChatMessage>) -> Self {
        self.chat_delta = delta;
        self
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// Per-node record inside a [`FlowRunOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_type: String,
    /// Tier the node executed in (0 = starting tier).
    pub tier: u32,
    /// Fully-resolved inputs the node ran with.
    pub inputs: Value,
    pub output: NodeOutput,
    pub duration_ms: u64,
}

/// Final result of a successful flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRunOutcome {
    pub execution_id: String,
    pub flow_id: String,
    /// Results in execution order (tier-ascending, declaration order within
    /// a tier).
    pub node_results: Vec<NodeExecutionResult>,
    pub state: RuntimeState,
    pub chat_history: Vec<ChatMessage>,
    pub ending_node_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl FlowRunOutcome {
    /// Results of the ending nodes only, in execution order.
    pub fn terminal_results(&self) -> Vec<&NodeExecutionResult> {
        self.node_results
            .iter()
            .filter(|r| self.ending_node_ids.contains(&r.node_id))
            .collect()
    }
}
