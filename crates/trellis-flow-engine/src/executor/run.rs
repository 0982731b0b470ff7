//! Core execution loop — runs a compiled schedule tier by tier.
//!
//! Within a tier, inputs are resolved for every node first, against the
//! snapshots committed at the previous tier boundary. Nodes then run
//! (sequentially by default, concurrently when opted in), and their state
//! patches, chat deltas, and outputs commit together at the tier boundary.
//! Writes made in tier N are therefore invisible to tier-N peers and visible
//! to every tier after it, in both execution modes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use super::node::{invoke_node, NodeInvocation};
use super::{ExecutionRequest, FlowExecutor};
use crate::errors::FlowError;
use crate::graph::depth::build_schedule;
use crate::node_ctx::ExecutionContext;
use crate::resolver::{resolve_node_inputs, ResolveContext};
use crate::traits::ErrorSanitizer;
use crate::types::execution::{
    FlowRunOutcome, NodeExecutionResult, NodePhase, RuntimeState, UsageReport,
};
use crate::types::{FlowNode, StoredFlow};

pub(super) async fn execute_flow(
    executor: &FlowExecutor,
    flow: &StoredFlow,
    request: ExecutionRequest,
) -> Result<FlowRunOutcome, FlowError> {
    let started = Instant::now();
    let started_at = Utc::now();

    let schedule = build_schedule(&flow.nodes, &flow.edges)?;
    tracing::debug!(
        flow_id = %flow.id,
        nodes = schedule.depth_queue.len(),
        tiers = schedule.tiers.len(),
        ending = ?schedule.ending_node_ids,
        "flow compiled"
    );

    let exec = build_execution_context(executor, flow, &request);
    let node_map: HashMap<&str, &FlowNode> =
        flow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut phases: HashMap<String, NodePhase> = schedule
        .depth_queue
        .keys()
        .map(|id| (id.clone(), NodePhase::Pending))
        .collect();
    let mut state = RuntimeState::seeded(request.state_seed);
    let mut chat_history = request.history;
    let mut executed: HashMap<String, Value> = HashMap::new();
    let mut node_results: Vec<NodeExecutionResult> = Vec::new();

    for (tier_index, tier) in schedule.tiers.iter().enumerate() {
        let tier_index = tier_index as u32;

        if exec.abort.is_cancelled() {
            let err = FlowError::Execution {
                node_id: tier.first().cloned().unwrap_or_default(),
                message: "execution aborted".into(),
            };
            return Err(fail_run(executor, &exec, err).await);
        }

        // Resolve every tier member against the previous boundary's
        // snapshots before anything runs.
        let mut pending: Vec<(&FlowNode, Value)> = Vec::with_capacity(tier.len());
        for node_id in tier {
            let node = node_map[node_id.as_str()];
            let resolve_ctx = ResolveContext {
                question: &request.question,
                chat_history: &chat_history,
                session_id: &exec.session_id,
                executed_outputs: &executed,
                variables: &request.variables,
                overrides: &request.overrides,
                state: &state,
            };
            let inputs = match resolve_node_inputs(&node.inputs, &resolve_ctx) {
                Ok(inputs) => inputs,
                Err(err) => {
                    tracing::error!(
                        flow_id = %flow.id,
                        node_id = %node.id,
                        error = %err,
                        "input resolution failed"
                    );
                    set_phase(&mut phases, &node.id, NodePhase::Failed);
                    return Err(fail_run(executor, &exec, err).await);
                }
            };
            set_phase(&mut phases, &node.id, NodePhase::InputResolved);
            pending.push((node, inputs));
        }

        for (node, _) in &pending {
            set_phase(&mut phases, &node.id, NodePhase::Running);
        }
        let invocations: Vec<NodeInvocation> = if executor.config.intra_tier_parallelism {
            join_all(pending.into_iter().map(|(node, inputs)| {
                invoke_node(
                    executor,
                    &exec,
                    node,
                    tier_index,
                    inputs,
                    state.clone(),
                    chat_history.clone(),
                    &request.question,
                )
            }))
            .await
        } else {
            let mut done = Vec::with_capacity(pending.len());
            for (node, inputs) in pending {
                let invocation = invoke_node(
                    executor,
                    &exec,
                    node,
                    tier_index,
                    inputs,
                    state.clone(),
                    chat_history.clone(),
                    &request.question,
                )
                .await;
                let failed = invocation.outcome.is_err();
                done.push(invocation);
                // A sequential tier stops at the first failure; later
                // members keep their resolved phase and never run.
                if failed {
                    break;
                }
            }
            done
        };

        // Usage first, for every member that ran: a completed peer's
        // events still reach the sink when another tier member failed.
        for invocation in &invocations {
            dispatch_usage(executor, &exec, invocation);
        }

        // Commit the tier in declaration order: failure check, then
        // state and outputs.
        for invocation in invocations {
            let output = match invocation.outcome {
                Ok(output) => output,
                Err(err) => {
                    set_phase(&mut phases, &invocation.node_id, NodePhase::Failed);
                    tracing::error!(
                        flow_id = %flow.id,
                        node_id = %invocation.node_id,
                        node_type = %invocation.node_type,
                        error = %err,
                        "node failed"
                    );
                    return Err(fail_run(executor, &exec, err).await);
                }
            };
            set_phase(&mut phases, &invocation.node_id, NodePhase::Succeeded);

            if schedule.ending_node_ids.contains(&invocation.node_id) {
                stream_terminal(&exec, &output.content).await;
            }

            state.merge_patch(output.state_patch.clone());
            chat_history.extend(output.chat_delta.iter().cloned());
            executed.insert(invocation.node_id.clone(), output.content.clone());
            node_results.push(NodeExecutionResult {
                node_id: invocation.node_id,
                node_type: invocation.node_type,
                tier: invocation.tier,
                inputs: invocation.inputs,
                output,
                duration_ms: invocation.duration_ms,
            });
        }
    }

    let finished_at = Utc::now();
    Ok(FlowRunOutcome {
        execution_id: exec.execution_id.clone(),
        flow_id: flow.id.clone(),
        node_results,
        state,
        chat_history,
        ending_node_ids: schedule.ending_node_ids,
        started_at,
        finished_at,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn build_execution_context(
    executor: &FlowExecutor,
    flow: &StoredFlow,
    request: &ExecutionRequest,
) -> ExecutionContext {
    let mut exec = ExecutionContext::new(flow.id.clone());
    if let Some(chat_id) = &request.chat_id {
        exec.chat_id = chat_id.clone();
    }
    if let Some(session_id) = &request.session_id {
        exec.session_id = session_id.clone();
    }
    if let Some(request_id) = &request.request_id {
        exec.request_id = request_id.clone();
    }
    exec.org_id = request.org_id.clone();
    exec.user_id = request.user_id.clone();
    exec.abort = request.abort.clone();
    if request.streaming {
        exec.stream = executor.stream.clone();
    }
    exec
}

fn set_phase(phases: &mut HashMap<String, NodePhase>, node_id: &str, phase: NodePhase) {
    if let Some(entry) = phases.get_mut(node_id) {
        tracing::debug!(node_id, from = ?*entry, to = ?phase, "node phase");
        *entry = phase;
    }
}

/// Attributes each usage event to this execution and hands it to the sink
/// off the hot path. Sink failures are logged and never fail the run.
fn dispatch_usage(executor: &FlowExecutor, exec: &ExecutionContext, invocation: &NodeInvocation) {
    for event in &invocation.usage_events {
        let report = UsageReport {
            request_id: exec.request_id.clone(),
            execution_id: exec.execution_id.clone(),
            org_id: exec.org_id.clone(),
            user_id: exec.user_id.clone(),
            provider: event.provider.clone(),
            model: event.model.clone(),
            prompt_tokens: event.usage.prompt_tokens,
            completion_tokens: event.usage.completion_tokens,
            total_tokens: event.usage.total_tokens,
            processing_time_ms: invocation.duration_ms,
            success: event.success,
        };
        let sink = Arc::clone(&executor.usage);
        tokio::spawn(async move {
            if let Err(err) = sink.record(report).await {
                tracing::warn!(error = %err, "usage sink rejected report");
            }
        });
    }
}

/// Pushes an ending node's content to the stream, when one is attached.
async fn stream_terminal(exec: &ExecutionContext, content: &Value) {
    let Some(sink) = &exec.stream else {
        return;
    };
    let rendered = match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    sink.stream_token(&exec.chat_id, &rendered).await;
}

/// Central failure path: logs the full error, scrubs it, and streams the
/// sanitized message as the final chunk before surfacing it.
async fn fail_run(executor: &FlowExecutor, exec: &ExecutionContext, err: FlowError) -> FlowError {
    tracing::error!(
        flow_id = %exec.flow_id,
        execution_id = %exec.execution_id,
        error = %err,
        "flow execution failed"
    );
    let sanitized = sanitize_error(executor.sanitizer.as_ref(), err);
    if let Some(sink) = &exec.stream {
        sink.stream_token(&exec.chat_id, &sanitized.to_string()).await;
    }
    sanitized
}

/// Scrubs node-produced messages. Engine-generated variants (resolution,
/// cycle, configuration, recursion) carry only ids and reference names and
/// pass through intact.
fn sanitize_error(sanitizer: &dyn ErrorSanitizer, err: FlowError) -> FlowError {
    match err {
        FlowError::Execution { node_id, message } => FlowError::Execution {
            node_id,
            message: sanitizer.sanitize(&message),
        },
        FlowError::Transport { message } => FlowError::Transport {
            message: sanitizer.sanitize(&message),
        },
        other => other,
    }
}
