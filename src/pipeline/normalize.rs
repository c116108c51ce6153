use serde_json::Value;

use crate::model::{COMPLETION_STATUS_TEXT, ParsedOutput};

/// Removes a surrounding code fence and a leading `json` language tag.
pub fn strip_code_fence(text: &str) -> &str {
    let mut text = text.trim();
    if text.starts_with("```") {
        text = text.trim_matches(|character| matches!(character, '`' | ' ' | '\n' | '\r'));
    }
    if let Some(rest) = text.strip_prefix("json") {
        text = rest.trim();
    }
    text
}

/// Turns one raw agent reply into a [`ParsedOutput`]. Replies that are not a
/// JSON object after stripping degrade to `{raw: <stripped text>}`.
pub fn normalize_reply(reply: &str) -> ParsedOutput {
    let mut text = strip_code_fence(reply);
    if let Some(rest) = text.strip_prefix(COMPLETION_STATUS_TEXT) {
        text = rest.trim();
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => ParsedOutput::from_object(object),
        _ => ParsedOutput::degraded(text.to_string()),
    }
}
