//! Sub-flow delegation node.
//!
//! Calls another, independently stored flow over its prediction endpoint and
//! surfaces the response as this node's text output. A flow invoking itself
//! is rejected before any request leaves the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::node_ctx::NodeCtx;
use crate::traits::{NodeFactory, NodeRuntime};
use crate::types::execution::NodeOutput;
use crate::types::{NodeError, NodeTypeMeta};

fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for the sub-flow prediction endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubflowConfig {
    /// Base URL of the host serving `/api/v1/prediction/{flow_id}`.
    pub base_url: String,
    /// Optional bearer key attached to every request.
    pub api_key: Option<String>,
    /// Transport deadline per call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SubflowConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Wire body of the prediction call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionRequest {
    question: String,
    chat_id: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    override_config: Value,
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct SubflowNodeFactory {
    config: SubflowConfig,
}

impl SubflowNodeFactory {
    pub fn new(config: SubflowConfig) -> Self {
        Self { config }
    }
}

impl NodeFactory for SubflowNodeFactory {
    fn meta(&self) -> NodeTypeMeta {
        NodeTypeMeta {
            node_type: "subflow".into(),
            label: "Sub-flow".into(),
            category: "flow".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "flow_id": { "type": "string" },
                    "question": { "type": "string" },
                    "override_config": { "type": "object" }
                },
                "required": ["flow_id"]
            }),
        }
    }

    fn instantiate(&self) -> Arc<dyn NodeRuntime> {
        Arc::new(SubflowNode::new(self.config.clone()))
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct SubflowNode {
    config: SubflowConfig,
}

impl SubflowNode {
    pub fn new(config: SubflowConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NodeRuntime for SubflowNode {
    async fn run(&self, inputs: Value, ctx: &NodeCtx) -> Result<NodeOutput, NodeError> {
        let target = inputs
            .get("flow_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NodeError::Configuration {
                message: "missing required input: flow_id".into(),
            })?;

        // Self-invocation must fail before anything leaves the process.
        if target == ctx.flow_id() {
            return Err(NodeError::Recursion {
                flow_id: target.to_owned(),
            });
        }

        let question = inputs
            .get("question")
            .and_then(|v| v.as_str())
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| ctx.question());
        let body = PredictionRequest {
            question: question.to_owned(),
            chat_id: ctx.chat_id().to_owned(),
            override_config: inputs.get("override_config").cloned().unwrap_or(Value::Null),
        };

        let url = format!(
            "{}/api/v1/prediction/{}",
            self.config.base_url.trim_end_matches('/'),
            target
        );
        tracing::debug!(target_flow = %target, url = %url, "delegating to sub-flow");

        let mut request = ctx
            .http()
            .post(&url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .header("x-org-id", ctx.org_id())
            .header("x-user-id", ctx.user_id())
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| NodeError::Transport {
            message: format!("sub-flow request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(NodeError::Transport {
                message: format!("sub-flow returned {status}: {}", snippet(&body_text)),
            });
        }

        let payload: Value = response.json().await.map_err(|e| NodeError::Transport {
            message: format!("invalid sub-flow response: {e}"),
        })?;
        Ok(NodeOutput::text(normalize_prediction(payload)))
    }
}

/// Collapses the prediction response shapes (`{text}`, `{json}`, raw) into a
/// single string.
fn normalize_prediction(payload: Value) -> String {
    if let Some(text) = payload.get("text").and_then(|v| v.as_str()) {
        return text.to_owned();
    }
    if let Some(value) = payload.get("json") {
        return value.to_string();
    }
    match payload {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn snippet(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..end].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_ctx::TestNodeCtx;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn node_for(server: &MockServer) -> SubflowNode {
        SubflowNode::new(SubflowConfig {
            base_url: server.uri(),
            api_key: None,
            timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn forwards_question_and_chat_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .and(body_partial_json(json!({
                "question": "what now?",
                "chatId": "chat-1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "child done"})))
            .expect(1)
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder()
            .flow_id("parent-flow")
            .chat_id("chat-1")
            .question("what now?")
            .build();

        let output = node
            .run(json!({"flow_id": "child-flow"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.content, json!("child done"));
    }

    #[tokio::test]
    async fn explicit_question_input_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .and(body_partial_json(json!({"question": "explicit"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder()
            .flow_id("parent-flow")
            .question("from context")
            .build();

        node.run(
            json!({"flow_id": "child-flow", "question": "explicit"}),
            &ctx,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn override_config_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .and(body_partial_json(json!({
                "overrideConfig": {"temperature": 0.1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder().flow_id("parent-flow").build();

        node.run(
            json!({
                "flow_id": "child-flow",
                "override_config": {"temperature": 0.1}
            }),
            &ctx,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn identity_headers_and_bearer_key_attached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .and(header("x-org-id", "org-1"))
            .and(header("x-user-id", "user-1"))
            .and(header("authorization", "Bearer shared-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let node = SubflowNode::new(SubflowConfig {
            base_url: server.uri(),
            api_key: Some("shared-key".into()),
            timeout_secs: 5,
        });
        let (ctx, _inspector) = TestNodeCtx::builder()
            .flow_id("parent-flow")
            .org_id("org-1")
            .user_id("user-1")
            .build();

        node.run(json!({"flow_id": "child-flow"}), &ctx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn response_shapes_normalize_to_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/json-flow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"json": {"a": 1}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/raw-flow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("plain")))
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder().flow_id("parent-flow").build();

        let output = node
            .run(json!({"flow_id": "json-flow"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.content, json!(r#"{"a":1}"#));

        let output = node.run(json!({"flow_id": "raw-flow"}), &ctx).await.unwrap();
        assert_eq!(output.content, json!("plain"));
    }

    #[tokio::test]
    async fn self_invocation_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "never"})))
            .expect(0)
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder().flow_id("flow-self").build();

        let err = node
            .run(json!({"flow_id": "flow-self"}), &ctx)
            .await
            .unwrap_err();
        match err {
            NodeError::Recursion { flow_id } => assert_eq!(flow_id, "flow-self"),
            other => panic!("expected Recursion, got: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_flow_id_is_configuration() {
        let server = MockServer::start().await;
        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder().build();

        let err = node.run(json!({}), &ctx).await.unwrap_err();
        match err {
            NodeError::Configuration { message } => {
                assert!(message.contains("flow_id"), "got: {message}");
            }
            other => panic!("expected Configuration, got: {other}"),
        }
    }

    #[tokio::test]
    async fn http_failure_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let node = node_for(&server);
        let (ctx, _inspector) = TestNodeCtx::builder().flow_id("parent-flow").build();

        let err = node
            .run(json!({"flow_id": "child-flow"}), &ctx)
            .await
            .unwrap_err();
        match err {
            NodeError::Transport { message } => {
                assert!(message.contains("500"), "got: {message}");
                assert!(message.contains("backend down"), "got: {message}");
            }
            other => panic!("expected Transport, got: {other}"),
        }
    }

    #[tokio::test]
    async fn trailing_slash_in_base_url_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/prediction/child-flow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let node = SubflowNode::new(SubflowConfig {
            base_url: format!("{}/", server.uri()),
            api_key: None,
            timeout_secs: 5,
        });
        let (ctx, _inspector) = TestNodeCtx::builder().flow_id("parent-flow").build();

        node.run(json!({"flow_id": "child-flow"}), &ctx)
            .await
            .unwrap();
    }
}
