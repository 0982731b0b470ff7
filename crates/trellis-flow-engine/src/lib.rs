//! Flow compilation and execution engine.
//!
//! This crate compiles stored node/edge graphs into tiered execution
//! schedules and runs them: inter-node `{{...}}` references resolve against
//! upstream outputs, variables, and runtime state; nodes execute tier by
//! tier with state and chat history committed at tier boundaries; terminal
//! output streams to an attached sink; sub-flows delegate over RPC with a
//! self-recursion guard.
//!
//! The engine is designed to be embedded: it knows nothing about web
//! servers, persistence schemas, or credential storage. Those arrive as
//! trait objects through [`FlowEngine::builder()`].

pub mod defaults;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod node_ctx;
pub mod nodes;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod traits;
pub mod types;

// Re-export public types at the crate level.

// defaults
pub use defaults::{DefaultSanitizer, DiscardStreamSink, InMemoryFlowStore, TracingUsageSink};

// engine
pub use engine::{FlowEngine, FlowEngineBuilder};

// errors
pub use errors::{FlowError, FlowStoreError, UsageSinkError};

// executor
pub use executor::{ExecutionRequest, ExecutorConfig, FlowExecutor};

// graph
pub use graph::depth::{build_schedule, Schedule};

// node_ctx
#[cfg(any(test, feature = "test-support"))]
pub use node_ctx::test_support::{TestNodeCtx, TestNodeCtxInspector};
pub use node_ctx::{ExecutionContext, NodeCtx};

// nodes
pub use nodes::{SubflowConfig, SubflowNode, SubflowNodeFactory};

// payload
pub use payload::{normalize_output, parse_escaped_argument, split_delimited_payload};

// registry
pub use registry::{NodeRegistry, NodeRuntimeLoader, RuntimeCache};

// resolver
pub use resolver::{resolve_node_inputs, resolve_value, ResolveContext};

// traits
pub use traits::{
    ArgTransformer, ErrorSanitizer, FlowStore, InitHandle, NodeFactory, NodeRuntime,
    OptionProvider, StreamSink, UsageSink,
};

// types
pub use types::execution::{
    FlowRunOutcome, NodeExecutionResult, NodeOutput, NodePhase, RuntimeState, StatePatch,
    TokenUsage, UsageEvent, UsageReport,
};
pub use types::{
    ChatMessage, ChatRole, FlowEdge, FlowNode, NodeError, NodeTypeMeta, OptionItem, StoredFlow,
    FLOW_SCHEMA_VERSION,
};
