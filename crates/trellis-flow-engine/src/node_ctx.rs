//! Runtime context given to every node invocation.
//!
//! Node authors interact with the engine exclusively through [`NodeCtx`].
//! The executor constructs one per node invocation with snapshots of the
//! execution's question, chat history, and accumulated state — node code
//! never creates one directly.
//!
//! # Usage recording
//!
//! Nodes that call metered providers report token counts through
//! [`NodeCtx::record_usage`]. The executor attributes the events to the
//! request and execution and forwards them to the configured usage sink.
//!
//! ```ignore
//! // Inside a NodeRuntime::run() implementation:
//! let response = call_provider(&request).await?;
//! ctx.record_usage(UsageEvent {
//!     provider: "openai".into(),
//!     model: response.model.clone(),
//!     usage: TokenUsage::new(response.prompt_tokens, response.completion_tokens),
//!     success: true,
//! });
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::traits::{InitHandle, StreamSink};
use crate::types::execution::{RuntimeState, UsageEvent};
use crate::types::ChatMessage;

/// Capacity of the per-node usage channel. Nodes emitting more events than
/// this in one run lose the overflow (advisory channel).
pub(crate) const USAGE_CHANNEL_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Identity and control surface shared by every node in one execution.
#[derive(Clone)]
pub struct ExecutionContext {
    pub flow_id: String,
    pub chat_id: String,
    pub session_id: String,
    pub org_id: String,
    pub user_id: String,
    pub request_id: String,
    pub execution_id: String,
    /// Cooperative abort signal. Cancelling it stops the run at the next
    /// node boundary and interrupts in-flight outbound calls.
    pub abort: CancellationToken,
    /// Token sink for terminal output, when the caller requested streaming.
    pub stream: Option<Arc<dyn StreamSink>>,
}

impl ExecutionContext {
    /// A fresh context with generated identifiers and no stream sink.
    pub fn new(flow_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            chat_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
            org_id: String::new(),
            user_id: String::new(),
            request_id: Uuid::new_v4().to_string(),
            execution_id: Uuid::new_v4().to_string(),
            abort: CancellationToken::new(),
            stream: None,
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("flow_id", &self.flow_id)
            .field("execution_id", &self.execution_id)
            .field("request_id", &self.request_id)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// NodeCtx
// ---------------------------------------------------------------------------

/// The runtime context given to every node invocation.
///
/// Carries execution identity, read-only snapshots of the conversation and
/// state as of the node's tier, the shared HTTP client, and the usage
/// channel. The executor creates a fresh `NodeCtx` per node; node code never
/// constructs one directly.
pub struct NodeCtx {
    exec: ExecutionContext,
    node_id: String,
    node_type: String,
    question: String,
    chat_history: Vec<ChatMessage>,
    state: RuntimeState,
    init_handle: Option<InitHandle>,
    usage_tx: mpsc::Sender<UsageEvent>,
    http: reqwest::Client,
}

impl NodeCtx {
    /// Construct a `NodeCtx` for one node invocation.
    ///
    /// Typically only called by the executor — node authors receive
    /// `&NodeCtx` and don't construct instances directly.
    pub fn new(
        exec: ExecutionContext,
        node_id: String,
        node_type: String,
        question: String,
        chat_history: Vec<ChatMessage>,
        state: RuntimeState,
        usage_tx: mpsc::Sender<UsageEvent>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            exec,
            node_id,
            node_type,
            question,
            chat_history,
            state,
            init_handle: None,
            usage_tx,
            http,
        }
    }

    pub(crate) fn set_init_handle(&mut self, handle: Option<InitHandle>) {
        self.init_handle = handle;
    }

    /// The flow this execution runs.
    pub fn flow_id(&self) -> &str {
        &self.exec.flow_id
    }

    pub fn chat_id(&self) -> &str {
        &self.exec.chat_id
    }

    pub fn session_id(&self) -> &str {
        &self.exec.session_id
    }

    pub fn org_id(&self) -> &str {
        &self.exec.org_id
    }

    pub fn user_id(&self) -> &str {
        &self.exec.user_id
    }

    pub fn request_id(&self) -> &str {
        &self.exec.request_id
    }

    pub fn execution_id(&self) -> &str {
        &self.exec.execution_id
    }

    /// The node instance being executed.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// The user question driving this execution.
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Chat history as of this node's tier.
    pub fn chat_history(&self) -> &[ChatMessage] {
        &self.chat_history
    }

    /// Accumulated state as of this node's tier. Writes from nodes in the
    /// same tier are not visible here; they commit at the tier boundary.
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Handle returned by this runtime's `init`, if it produced one.
    pub fn init_handle(&self) -> Option<&InitHandle> {
        self.init_handle.as_ref()
    }

    /// Cooperative abort signal for long-running work and outbound calls.
    pub fn abort(&self) -> &CancellationToken {
        &self.exec.abort
    }

    /// Shared HTTP client for outbound requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Report token usage for one provider call (advisory channel — events
    /// beyond capacity are dropped with a warning, never blocking the node).
    pub fn record_usage(&self, event: UsageEvent) {
        if let Err(err) = self.usage_tx.try_send(event) {
            tracing::warn!(
                node_id = %self.node_id,
                error = %err,
                "dropping usage event: channel full or closed"
            );
        }
    }

    /// Push a token to the caller's stream, when one is attached. No-op
    /// otherwise.
    pub async fn stream_token(&self, token: &str) {
        if let Some(sink) = &self.exec.stream {
            sink.stream_token(&self.exec.chat_id, token).await;
        }
    }
}

impl std::fmt::Debug for NodeCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCtx")
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .field("execution_id", &self.exec.execution_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Test support — public so plugin crates can use TestNodeCtx in their tests
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! Test utilities for building [`NodeCtx`] instances in node tests.
    //!
    //! ```ignore
    //! let (ctx, inspector) = TestNodeCtx::builder()
    //!     .node_id("llm-1")
    //!     .question("hello")
    //!     .build();
    //!
    //! my_node.run(inputs, &ctx).await?;
    //!
    //! assert_eq!(inspector.recorded_usage().await.len(), 1);
    //! ```

    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::errors::UsageSinkError;
    use crate::traits::{InitHandle, StreamSink, UsageSink};
    use crate::types::execution::{RuntimeState, StatePatch, UsageEvent, UsageReport};
    use crate::types::ChatMessage;

    use super::{ExecutionContext, NodeCtx, USAGE_CHANNEL_CAPACITY};

    // -- Recording StreamSink -------------------------------------------------

    /// Captures streamed tokens for assertions.
    #[derive(Default)]
    pub struct RecordingStreamSink {
        tokens: Mutex<Vec<(String, String)>>,
    }

    impl RecordingStreamSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// All `(chat_id, token)` pairs streamed so far.
        pub fn tokens(&self) -> Vec<(String, String)> {
            self.tokens.lock().clone()
        }
    }

    #[async_trait]
    impl StreamSink for RecordingStreamSink {
        async fn stream_token(&self, chat_id: &str, token: &str) {
            self.tokens.lock().push((chat_id.to_owned(), token.to_owned()));
        }
    }

    // -- Recording UsageSink --------------------------------------------------

    /// Captures usage reports for assertions.
    #[derive(Default)]
    pub struct RecordingUsageSink {
        reports: Mutex<Vec<UsageReport>>,
    }

    impl RecordingUsageSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reports(&self) -> Vec<UsageReport> {
            self.reports.lock().clone()
        }
    }

    #[async_trait]
    impl UsageSink for RecordingUsageSink {
        async fn record(&self, report: UsageReport) -> Result<(), UsageSinkError> {
            self.reports.lock().push(report);
            Ok(())
        }
    }

    /// A usage sink that always fails, for verifying sink errors never fail
    /// a run.
    #[derive(Default)]
    pub struct FailingUsageSink;

    #[async_trait]
    impl UsageSink for FailingUsageSink {
        async fn record(&self, _report: UsageReport) -> Result<(), UsageSinkError> {
            Err(UsageSinkError::new("sink unavailable"))
        }
    }

    // -- TestNodeCtx builder --------------------------------------------------

    /// Builder for constructing a [`NodeCtx`] in tests.
    pub struct TestNodeCtx {
        flow_id: String,
        node_id: String,
        node_type: String,
        question: String,
        chat_id: Option<String>,
        session_id: Option<String>,
        org_id: String,
        user_id: String,
        state: StatePatch,
        history: Vec<ChatMessage>,
        stream: Option<Arc<dyn StreamSink>>,
        init_handle: Option<InitHandle>,
    }

    impl TestNodeCtx {
        /// Start building a test `NodeCtx`.
        pub fn builder() -> Self {
            Self {
                flow_id: "test-flow".to_owned(),
                node_id: "test-node".to_owned(),
                node_type: "test".to_owned(),
                question: String::new(),
                chat_id: None,
                session_id: None,
                org_id: "test-org".to_owned(),
                user_id: "test-user".to_owned(),
                state: StatePatch::new(),
                history: Vec::new(),
                stream: None,
                init_handle: None,
            }
        }

        pub fn flow_id(mut self, flow_id: &str) -> Self {
            self.flow_id = flow_id.to_owned();
            self
        }

        pub fn node_id(mut self, node_id: &str) -> Self {
            self.node_id = node_id.to_owned();
            self
        }

        pub fn node_type(mut self, node_type: &str) -> Self {
            self.node_type = node_type.to_owned();
            self
        }

        pub fn question(mut self, question: &str) -> Self {
            self.question = question.to_owned();
            self
        }

        pub fn chat_id(mut self, chat_id: &str) -> Self {
            self.chat_id = Some(chat_id.to_owned());
            self
        }

        pub fn session_id(mut self, session_id: &str) -> Self {
            self.session_id = Some(session_id.to_owned());
            self
        }

        pub fn org_id(mut self, org_id: &str) -> Self {
            self.org_id = org_id.to_owned();
            self
        }

        pub fn user_id(mut self, user_id: &str) -> Self {
            self.user_id = user_id.to_owned();
            self
        }

        /// Seed one state entry (can be called multiple times).
        pub fn state(mut self, key: &str, value: serde_json::Value) -> Self {
            self.state.insert(key.to_owned(), value);
            self
        }

        pub fn history(mut self, history: Vec<ChatMessage>) -> Self {
            self.history = history;
            self
        }

        pub fn stream(mut self, sink: Arc<dyn StreamSink>) -> Self {
            self.stream = Some(sink);
            self
        }

        pub fn init_handle(mut self, handle: InitHandle) -> Self {
            self.init_handle = Some(handle);
            self
        }

        /// Build the `NodeCtx` and an inspector for verifying side effects.
        pub fn build(self) -> (NodeCtx, TestNodeCtxInspector) {
            let (usage_tx, usage_rx) = mpsc::channel::<UsageEvent>(USAGE_CHANNEL_CAPACITY);

            let mut exec = ExecutionContext::new(self.flow_id);
            exec.org_id = self.org_id;
            exec.user_id = self.user_id;
            if let Some(chat_id) = self.chat_id {
                exec.chat_id = chat_id;
            }
            if let Some(session_id) = self.session_id {
                exec.session_id = session_id;
            }
            exec.stream = self.stream;

            let mut ctx = NodeCtx::new(
                exec,
                self.node_id,
                self.node_type,
                self.question,
                self.history,
                RuntimeState::seeded(self.state),
                usage_tx,
                reqwest::Client::new(),
            );
            ctx.set_init_handle(self.init_handle);

            let inspector = TestNodeCtxInspector {
                usage_rx: Arc::new(tokio::sync::Mutex::new(usage_rx)),
            };
            (ctx, inspector)
        }
    }

    /// Inspect side effects produced by a node under test.
    pub struct TestNodeCtxInspector {
        usage_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<UsageEvent>>>,
    }

    impl TestNodeCtxInspector {
        /// Drain all recorded usage events from the channel.
        pub async fn recorded_usage(&self) -> Vec<UsageEvent> {
            let mut rx = self.usage_rx.lock().await;
            let mut events = Vec::new();
            while let Ok(ev) = rx.try_recv() {
                events.push(ev);
            }
            events
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use test_support::{TestNodeCtx, TestNodeCtxInspector};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
