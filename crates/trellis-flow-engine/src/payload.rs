//! Legacy payload handling.
//!
//! Older node implementations packed auxiliary payloads into their text
//! output behind well-known delimiters, and tool-call arguments arrive as
//! escaped JSON-ish strings. This module upgrades both into structured form:
//! delimited strings become [`NodeOutput`] sections, escaped arguments become
//! JSON values. Anything that fails to parse degrades to text rather than
//! failing the node.

use serde_json::Value;

use crate::types::execution::NodeOutput;

pub const ARTIFACTS_DELIMITER: &str = "----ARTIFACTS----";
pub const TOOL_ARGS_DELIMITER: &str = "----TOOL_ARGS----";
pub const SOURCE_DOCUMENTS_DELIMITER: &str = "----SOURCE_DOCUMENTS----";

const DELIMITERS: [&str; 3] = [
    ARTIFACTS_DELIMITER,
    TOOL_ARGS_DELIMITER,
    SOURCE_DOCUMENTS_DELIMITER,
];

/// Splits a delimited text payload into a structured [`NodeOutput`].
///
/// `content` becomes everything before the first delimiter, trailing
/// whitespace removed. Each section runs from its delimiter to the next one
/// (or the end) and is parsed as JSON; a section that fails to parse is
/// logged and dropped, never fatal.
pub fn split_delimited_payload(text: &str) -> NodeOutput {
    let mut marks: Vec<(usize, &str)> = DELIMITERS
        .iter()
        .filter_map(|d| text.find(d).map(|pos| (pos, *d)))
        .collect();
    marks.sort_unstable_by_key(|(pos, _)| *pos);

    let content_end = marks.first().map_or(text.len(), |(pos, _)| *pos);
    let mut output = NodeOutput::text(text[..content_end].trim_end());

    for (i, (pos, delimiter)) in marks.iter().enumerate() {
        let section_start = pos + delimiter.len();
        let section_end = marks.get(i + 1).map_or(text.len(), |(next, _)| *next);
        let raw = text[section_start..section_end].trim();
        if raw.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => match *delimiter {
                ARTIFACTS_DELIMITER => output.artifacts = Some(value),
                TOOL_ARGS_DELIMITER => output.tool_args = Some(value),
                _ => output.source_documents = Some(value),
            },
            Err(err) => {
                tracing::warn!(
                    section = delimiter,
                    error = %err,
                    "dropping unparseable delimited section"
                );
            }
        }
    }
    output
}

/// Upgrades a legacy delimited string output into the structured envelope.
///
/// Only applies when the content is a string containing a delimiter and no
/// structured section is populated yet; structured outputs pass through
/// unchanged, keeping their state patch and chat delta.
pub fn normalize_output(output: NodeOutput) -> NodeOutput {
    let already_structured = output.artifacts.is_some()
        || output.tool_args.is_some()
        || output.source_documents.is_some();
    if already_structured {
        return output;
    }
    let Value::String(text) = &output.content else {
        return output;
    };
    if !DELIMITERS.iter().any(|d| text.contains(d)) {
        return output;
    }

    let mut upgraded = split_delimited_payload(text);
    upgraded.state_patch = output.state_patch;
    upgraded.chat_delta = output.chat_delta;
    upgraded
}

/// Parses an escaped tool-call argument into a JSON value.
///
/// Unescapes backslash sequences, then attempts a JSON parse when the result
/// looks like an array or object. Parse failures fall back to the unescaped
/// string.
pub fn parse_escaped_argument(raw: &str) -> Value {
    let unescaped = unescape_argument(raw);
    let trimmed = unescaped.trim();
    let looks_structured = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if looks_structured {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::String(unescaped)
}

/// Removes one level of backslash escaping. A backslash followed by one of
/// `"\[]{}` yields that character; any other backslash stays literal.
fn unescape_argument(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '[' | ']' | '{' | '}') => {
                out.push(next);
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}
