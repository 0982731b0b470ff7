//! Flow executor — the core of the engine.
//!
//! Compiles a stored flow into a tier schedule and runs it: inputs resolved
//! per tier, node capabilities driven in order (argument transform, init,
//! run), state and chat history committed at tier boundaries, usage handed
//! off asynchronously, terminal output streamed, and failures scrubbed
//! before they surface.

mod node;
pub(crate) mod run;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::defaults::{DefaultSanitizer, TracingUsageSink};
use crate::errors::FlowError;
use crate::registry::NodeRuntimeLoader;
use crate::traits::{ErrorSanitizer, StreamSink, UsageSink};
use crate::types::execution::FlowRunOutcome;
use crate::types::{ChatMessage, StoredFlow};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Configuration for the executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    /// Run tier members concurrently. Off by default: tiers execute in
    /// declaration order, which keeps runs easy to reason about. Enabling
    /// this changes wall-clock behavior only — commit order and state
    /// visibility are identical in both modes.
    pub intra_tier_parallelism: bool,
}

/// One execution request.
///
/// Everything is optional except the question; missing identifiers are
/// generated, missing collections are empty.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The user input driving this execution (`{{question}}`).
    pub question: String,
    /// Conversation identifier, generated when absent. Streamed tokens and
    /// sub-flow calls carry it.
    pub chat_id: Option<String>,
    pub session_id: Option<String>,
    pub org_id: String,
    pub user_id: String,
    /// Caller correlation id, generated when absent.
    pub request_id: Option<String>,
    /// Field-level input overrides, highest resolution precedence.
    pub overrides: BTreeMap<String, Value>,
    /// Per-request variables, resolved via `{{$vars.name}}` or bare name.
    pub variables: BTreeMap<String, Value>,
    /// Initial runtime state entries.
    pub state_seed: BTreeMap<String, Value>,
    /// Prior conversation turns (`{{chat_history}}`).
    pub history: Vec<ChatMessage>,
    /// Attach the executor's stream sink to this run.
    pub streaming: bool,
    /// Cooperative abort signal; cancel it to stop the run.
    pub abort: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

impl Default for ExecutionRequest {
    fn default() -> Self {
        Self {
            question: String::new(),
            chat_id: None,
            session_id: None,
            org_id: String::new(),
            user_id: String::new(),
            request_id: None,
            overrides: BTreeMap::new(),
            variables: BTreeMap::new(),
            state_seed: BTreeMap::new(),
            history: Vec::new(),
            streaming: false,
            abort: CancellationToken::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowExecutor
// ---------------------------------------------------------------------------

/// Runs compiled flows tier by tier.
///
/// Construction wires in the collaborators; [`execute`](Self::execute) is
/// reentrant and takes `&self`, so one executor serves concurrent runs.
pub struct FlowExecutor {
    loader: Arc<NodeRuntimeLoader>,
    stream: Option<Arc<dyn StreamSink>>,
    usage: Arc<dyn UsageSink>,
    sanitizer: Arc<dyn ErrorSanitizer>,
    http: reqwest::Client,
    config: ExecutorConfig,
}

impl FlowExecutor {
    /// An executor with logging defaults: no stream transport, usage to
    /// `tracing`, the default sanitizer, a fresh HTTP client.
    pub fn new(loader: Arc<NodeRuntimeLoader>) -> Self {
        Self {
            loader,
            stream: None,
            usage: Arc::new(TracingUsageSink),
            sanitizer: Arc::new(DefaultSanitizer),
            http: reqwest::Client::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_stream_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.stream = Some(sink);
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = sink;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn ErrorSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn loader(&self) -> &NodeRuntimeLoader {
        &self.loader
    }

    /// Executes a flow end to end.
    ///
    /// Fails fast on the first node failure; the error has already been
    /// logged in full and sanitized by the time it returns.
    pub async fn execute(
        &self,
        flow: &StoredFlow,
        request: ExecutionRequest,
    ) -> Result<FlowRunOutcome, FlowError> {
        run::execute_flow(self, flow, request).await
    }
}

impl std::fmt::Debug for FlowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowExecutor")
            .field("config", &self.config)
            .field("streaming", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
