//! Default error-message sanitizer.

use crate::traits::ErrorSanitizer;

/// Scrubs secrets and infrastructure detail from failure messages.
///
/// Redaction rules, applied token by token:
/// - anything following a `Bearer` keyword
/// - provider API keys (`sk-` prefix)
/// - absolute filesystem paths (unix and windows drive forms)
/// - UUID-shaped tokens
/// - long opaque tokens (32+ chars of key-like material)
///
/// Matched tokens become `[redacted]`. Everything else passes through with
/// whitespace collapsed to single spaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSanitizer;

impl ErrorSanitizer for DefaultSanitizer {
    fn sanitize(&self, message: &str) -> String {
        let mut out: Vec<&str> = Vec::new();
        let mut after_bearer = false;
        for token in message.split_whitespace() {
            let redact = after_bearer || is_sensitive_token(token);
            after_bearer = token.eq_ignore_ascii_case("bearer");
            out.push(if redact { "[redacted]" } else { token });
        }
        out.join(" ")
    }
}

fn is_sensitive_token(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| matches!(c, '\'' | '"' | ',' | ';' | '(' | ')'));
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with("sk-") {
        return true;
    }
    if is_absolute_path(trimmed) {
        return true;
    }
    if is_uuid_shaped(trimmed) {
        return true;
    }
    is_opaque_key(trimmed)
}

fn is_absolute_path(s: &str) -> bool {
    if s.starts_with('/') && s[1..].contains('/') {
        return true;
    }
    // Windows drive form: `C:\...`
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(drive), Some(':'), Some('\\')) if drive.is_ascii_alphabetic()
    )
}

fn is_uuid_shaped(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}

fn is_opaque_key(s: &str) -> bool {
    s.len() >= 32 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
