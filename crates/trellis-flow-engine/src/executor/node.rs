//! Single-node invocation.
//!
//! Runs one node through its full capability pipeline (argument transform,
//! optional init, run) with cooperative abort, and collects everything the
//! tier loop needs: the outcome, drained usage events, and timing. Errors
//! are carried in the result rather than returned, so a tier can finish
//! resolving its bookkeeping before the run aborts.

use std::time::Instant;

use tokio::sync::mpsc;

use super::FlowExecutor;
use crate::errors::FlowError;
use crate::node_ctx::{ExecutionContext, NodeCtx, USAGE_CHANNEL_CAPACITY};
use crate::payload::normalize_output;
use crate::types::execution::{NodeOutput, RuntimeState, UsageEvent};
use crate::types::{ChatMessage, FlowNode, NodeError};

// ---------------------------------------------------------------------------
// Invocation result
// ---------------------------------------------------------------------------

pub(super) struct NodeInvocation {
    pub node_id: String,
    pub node_type: String,
    pub tier: u32,
    /// Effective inputs the node ran with (post argument transform).
    pub inputs: serde_json::Value,
    pub outcome: Result<NodeOutput, FlowError>,
    pub usage_events: Vec<UsageEvent>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Executes one node with the given tier-consistent snapshots.
///
/// Infallible at the signature level: load, transform, init, and run errors
/// all land in [`NodeInvocation::outcome`].
pub(super) async fn invoke_node(
    executor: &FlowExecutor,
    exec: &ExecutionContext,
    node: &FlowNode,
    tier: u32,
    inputs: serde_json::Value,
    state: RuntimeState,
    history: Vec<ChatMessage>,
    question: &str,
) -> NodeInvocation {
    let started = Instant::now();
    let mut invocation = NodeInvocation {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        tier,
        inputs,
        outcome: Err(FlowError::Execution {
            node_id: node.id.clone(),
            message: "node did not run".into(),
        }),
        usage_events: Vec::new(),
        duration_ms: 0,
    };

    let runtime = match executor.loader.load(&node.node_type).await {
        Ok(runtime) => runtime,
        Err(err) => {
            invocation.outcome = Err(err);
            invocation.duration_ms = started.elapsed().as_millis() as u64;
            return invocation;
        }
    };

    // Argument transform runs on the already-resolved inputs, before init
    // sees them.
    if let Some(transformer) = runtime.arg_transformer() {
        match transformer.transform_args(&invocation.inputs) {
            Ok(transformed) => invocation.inputs = transformed,
            Err(err) => {
                invocation.outcome = Err(FlowError::from_node(&node.id, err));
                invocation.duration_ms = started.elapsed().as_millis() as u64;
                return invocation;
            }
        }
    }

    let (usage_tx, mut usage_rx) = mpsc::channel::<UsageEvent>(USAGE_CHANNEL_CAPACITY);
    let mut ctx = NodeCtx::new(
        exec.clone(),
        node.id.clone(),
        node.node_type.clone(),
        question.to_owned(),
        history,
        state,
        usage_tx,
        executor.http.clone(),
    );

    let result = drive_runtime(runtime.as_ref(), &mut ctx, &invocation.inputs, exec).await;

    invocation.duration_ms = started.elapsed().as_millis() as u64;
    while let Ok(event) = usage_rx.try_recv() {
        invocation.usage_events.push(event);
    }
    invocation.outcome = match result {
        Ok(output) => Ok(normalize_output(output)),
        Err(err) => Err(FlowError::from_node(&node.id, err)),
    };
    invocation
}

/// Runs init then run, racing each phase against the abort signal.
async fn drive_runtime(
    runtime: &dyn crate::traits::NodeRuntime,
    ctx: &mut NodeCtx,
    inputs: &serde_json::Value,
    exec: &ExecutionContext,
) -> Result<NodeOutput, NodeError> {
    let handle = tokio::select! {
        biased;
        _ = exec.abort.cancelled() => return Err(aborted()),
        result = runtime.init(inputs, ctx) => result?,
    };
    ctx.set_init_handle(handle);

    tokio::select! {
        biased;
        _ = exec.abort.cancelled() => Err(aborted()),
        result = runtime.run(inputs.clone(), ctx) => result,
    }
}

fn aborted() -> NodeError {
    NodeError::Execution {
        message: "execution aborted".into(),
    }
}
