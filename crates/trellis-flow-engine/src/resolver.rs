//! Template resolution for node inputs.
//!
//! Input fields may embed `{{...}}` references. A reference names one of the
//! reserved execution values (`question`, `chat_history`, `session_id`), a
//! global variable (`$vars.name`), a state entry (`$state.key`), or the
//! output of an upstream node (`nodeId` or `nodeId.path.to.field`).
//!
//! Precedence for a whole input field: caller override, then reference
//! resolution, then the literal as authored. A field consisting of exactly
//! one reference keeps the referenced value's JSON type; references embedded
//! in surrounding text are stringified in place.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::errors::FlowError;
use crate::types::execution::RuntimeState;
use crate::types::ChatMessage;

/// Everything a template can draw on during one resolution pass.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub question: &'a str,
    pub chat_history: &'a [ChatMessage],
    pub session_id: &'a str,
    /// Primary outputs of already-executed nodes, keyed by node id.
    pub executed_outputs: &'a HashMap<String, Value>,
    /// Global variables (engine-level merged with per-request).
    pub variables: &'a BTreeMap<String, Value>,
    /// Caller-supplied field overrides, keyed by input field name.
    pub overrides: &'a BTreeMap<String, Value>,
    pub state: &'a RuntimeState,
}

/// Resolves every input field of a node against `ctx`.
///
/// Override keys replace the authored field value before any template
/// scanning, so an override wins even when the authored value held a
/// reference. Override-only keys (not authored on the node) are added.
pub fn resolve_node_inputs(
    inputs: &serde_json::Map<String, Value>,
    ctx: &ResolveContext<'_>,
) -> Result<Value, FlowError> {
    let mut resolved = serde_json::Map::with_capacity(inputs.len());
    for (field, value) in inputs {
        let effective = ctx.overrides.get(field).unwrap_or(value);
        resolved.insert(field.clone(), resolve_value(effective, ctx)?);
    }
    for (field, value) in ctx.overrides {
        if !resolved.contains_key(field) {
            resolved.insert(field.clone(), resolve_value(value, ctx)?);
        }
    }
    Ok(Value::Object(resolved))
}

/// Resolves references inside an arbitrary JSON value, recursing through
/// arrays and objects. Non-string leaves pass through untouched, which also
/// makes a second pass over already-resolved inputs a no-op.
pub fn resolve_value(value: &Value, ctx: &ResolveContext<'_>) -> Result<Value, FlowError> {
    match value {
        Value::String(s) => resolve_template(s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolves a single string template.
fn resolve_template(template: &str, ctx: &ResolveContext<'_>) -> Result<Value, FlowError> {
    // Single-reference fields keep the referenced value's type.
    let trimmed = template.trim();
    if let Some(inner) = exact_reference(trimmed) {
        return lookup(inner.trim(), ctx);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(end_rel) = rest[start + 2..].find("}}") else {
            // Unterminated braces are literal text.
            break;
        };
        let end = start + 2 + end_rel;
        out.push_str(&rest[..start]);
        let reference = rest[start + 2..end].trim();
        out.push_str(&render(lookup(reference, ctx)?));
        rest = &rest[end + 2..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// Returns the inner reference when `s` is exactly one `{{...}}` and nothing
/// else.
fn exact_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    // A second opener means this is two references, not one.
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

/// Looks up one reference.
fn lookup(reference: &str, ctx: &ResolveContext<'_>) -> Result<Value, FlowError> {
    match reference {
        "question" => return Ok(Value::String(ctx.question.to_owned())),
        "session_id" => return Ok(Value::String(ctx.session_id.to_owned())),
        "chat_history" => return Ok(Value::String(render_history(ctx.chat_history))),
        _ => {}
    }

    if let Some(name) = reference.strip_prefix("$vars.") {
        return ctx.variables.get(name).cloned().ok_or_else(|| FlowError::Resolution {
            message: format!("unknown variable '$vars.{name}'"),
        });
    }

    if let Some(key) = reference.strip_prefix("$state.") {
        return ctx.state.get(key).cloned().ok_or_else(|| FlowError::Resolution {
            message: format!("unknown state key '$state.{key}'"),
        });
    }

    let (node_id, path) = match reference.split_once('.') {
        Some((id, path)) => (id, Some(path)),
        None => (reference, None),
    };

    if let Some(output) = ctx.executed_outputs.get(node_id) {
        return Ok(match path {
            // Missing path inside a present output degrades to empty text.
            Some(path) => descend(output, path).cloned().unwrap_or(Value::String(String::new())),
            None => output.clone(),
        });
    }

    // A bare name can also be a variable used without the `$vars.` prefix.
    if path.is_none() {
        if let Some(value) = ctx.variables.get(reference) {
            return Ok(value.clone());
        }
    }

    Err(FlowError::Resolution {
        message: format!("unresolved reference '{reference}'"),
    })
}

/// Walks a dotted path through objects and array indices.
fn descend<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Stringifies a resolved value for embedding inside surrounding text.
fn render(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => composite.to_string(),
    }
}

fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        executed: HashMap<String, Value>,
        variables: BTreeMap<String, Value>,
        overrides: BTreeMap<String, Value>,
        history: Vec<ChatMessage>,
        state: RuntimeState,
    }

    impl Fixture {
        fn new() -> Self {
            let mut executed = HashMap::new();
            executed.insert("llm-1".to_owned(), json!("the answer"));
            executed.insert(
                "retriever-1".to_owned(),
                json!({"docs": [{"title": "first"}, {"title": "second"}], "count": 2}),
            );
            let mut variables = BTreeMap::new();
            variables.insert("greeting".to_owned(), json!("hello"));
            variables.insert("temperature".to_owned(), json!(0.2));
            let mut seed = BTreeMap::new();
            seed.insert("step".to_owned(), json!(3));
            Self {
                executed,
                variables,
                overrides: BTreeMap::new(),
                history: vec![ChatMessage::user("hi"), ChatMessage::assistant("hello there")],
                state: RuntimeState::seeded(seed),
            }
        }

        fn ctx(&self) -> ResolveContext<'_> {
            ResolveContext {
                question: "what is up?",
                chat_history: &self.history,
                session_id: "sess-9",
                executed_outputs: &self.executed,
                variables: &self.variables,
                overrides: &self.overrides,
                state: &self.state,
            }
        }
    }

    #[test]
    fn literal_passes_through() {
        let fx = Fixture::new();
        let v = resolve_value(&json!("no references here"), &fx.ctx()).unwrap();
        assert_eq!(v, json!("no references here"));
    }

    #[test]
    fn reserved_references() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        assert_eq!(
            resolve_value(&json!("{{question}}"), &ctx).unwrap(),
            json!("what is up?")
        );
        assert_eq!(
            resolve_value(&json!("{{session_id}}"), &ctx).unwrap(),
            json!("sess-9")
        );
        assert_eq!(
            resolve_value(&json!("{{chat_history}}"), &ctx).unwrap(),
            json!("user: hi\nassistant: hello there")
        );
    }

    #[test]
    fn upstream_output_whole_and_path() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        assert_eq!(
            resolve_value(&json!("{{llm-1}}"), &ctx).unwrap(),
            json!("the answer")
        );
        assert_eq!(
            resolve_value(&json!("{{retriever-1.docs.1.title}}"), &ctx).unwrap(),
            json!("second")
        );
    }

    #[test]
    fn missing_path_in_present_output_is_empty_string() {
        let fx = Fixture::new();
        let v = resolve_value(&json!("{{retriever-1.docs.9.title}}"), &fx.ctx()).unwrap();
        assert_eq!(v, json!(""));
    }

    #[test]
    fn unknown_node_reference_is_fatal() {
        let fx = Fixture::new();
        let err = resolve_value(&json!("{{ghost-node.output}}"), &fx.ctx()).unwrap_err();
        match err {
            FlowError::Resolution { message } => assert!(message.contains("ghost-node")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn variables_with_and_without_prefix() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        assert_eq!(
            resolve_value(&json!("{{$vars.greeting}}"), &ctx).unwrap(),
            json!("hello")
        );
        assert_eq!(resolve_value(&json!("{{greeting}}"), &ctx).unwrap(), json!("hello"));
        let err = resolve_value(&json!("{{$vars.nope}}"), &ctx).unwrap_err();
        match err {
            FlowError::Resolution { message } => assert!(message.contains("$vars.nope")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn state_references() {
        let fx = Fixture::new();
        assert_eq!(resolve_value(&json!("{{$state.step}}"), &fx.ctx()).unwrap(), json!(3));
        let err = resolve_value(&json!("{{$state.missing}}"), &fx.ctx()).unwrap_err();
        assert!(matches!(err, FlowError::Resolution { .. }));
    }

    #[test]
    fn single_reference_preserves_type() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        assert_eq!(
            resolve_value(&json!("{{$vars.temperature}}"), &ctx).unwrap(),
            json!(0.2)
        );
        assert_eq!(
            resolve_value(&json!("{{retriever-1.count}}"), &ctx).unwrap(),
            json!(2)
        );
        // Surrounding whitespace still counts as single.
        assert_eq!(
            resolve_value(&json!("  {{retriever-1.count}}  "), &ctx).unwrap(),
            json!(2)
        );
    }

    #[test]
    fn embedded_references_stringify() {
        let fx = Fixture::new();
        let v = resolve_value(
            &json!("Q: {{question}} (t={{$vars.temperature}}, step {{$state.step}})"),
            &fx.ctx(),
        )
        .unwrap();
        assert_eq!(v, json!("Q: what is up? (t=0.2, step 3)"));
    }

    #[test]
    fn embedded_composite_renders_as_json() {
        let fx = Fixture::new();
        let v = resolve_value(&json!("docs: {{retriever-1.docs.0}}"), &fx.ctx()).unwrap();
        assert_eq!(v, json!(r#"docs: {"title":"first"}"#));
    }

    #[test]
    fn recursion_through_arrays_and_objects() {
        let fx = Fixture::new();
        let v = resolve_value(
            &json!({"messages": ["{{question}}", {"nested": "{{llm-1}}"}], "n": 1}),
            &fx.ctx(),
        )
        .unwrap();
        assert_eq!(
            v,
            json!({"messages": ["what is up?", {"nested": "the answer"}], "n": 1})
        );
    }

    #[test]
    fn unterminated_braces_stay_literal() {
        let fx = Fixture::new();
        let v = resolve_value(&json!("open {{question and done"), &fx.ctx()).unwrap();
        assert_eq!(v, json!("open {{question and done"));
    }

    #[test]
    fn overrides_replace_authored_fields() {
        let mut fx = Fixture::new();
        fx.overrides.insert("prompt".to_owned(), json!("forced"));
        fx.overrides.insert("extra".to_owned(), json!("{{question}}"));
        let mut inputs = serde_json::Map::new();
        inputs.insert("prompt".to_owned(), json!("{{llm-1}}"));
        inputs.insert("keep".to_owned(), json!("asIs"));

        let resolved = resolve_node_inputs(&inputs, &fx.ctx()).unwrap();
        assert_eq!(resolved["prompt"], json!("forced"));
        assert_eq!(resolved["keep"], json!("asIs"));
        // Override-only fields are added, and templates in them resolve.
        assert_eq!(resolved["extra"], json!("what is up?"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let fx = Fixture::new();
        let ctx = fx.ctx();
        let first = resolve_value(
            &json!({"a": "{{question}}", "b": "t={{$vars.temperature}}"}),
            &ctx,
        )
        .unwrap();
        let second = resolve_value(&first, &ctx).unwrap();
        assert_eq!(first, second);
    }
}
