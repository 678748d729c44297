//! `rcc.tool.v1` envelopes embedded in text
//!
//! Candidate objects are located with the quote-aware brace scanner, never with
//! a regex, because envelope arguments routinely contain code with braces
//! inside string literals. An envelope may also sit inside a larger object
//! (for example a tool message echoed back by the model), possibly as a
//! JSON-encoded string.

use serde_json::Value;

use super::TextMatch;
use crate::lenient::parse_lenient;
use crate::types::{ENVELOPE_VERSION, ToolCallLite};
use crate::utils::json_scan::{QuoteStyle, balanced_objects};

const MAX_DEPTH: usize = 8;

pub fn scan(text: &str) -> Option<Vec<TextMatch>> {
    if !text.contains(ENVELOPE_VERSION) {
        return None;
    }

    let matches: Vec<TextMatch> = balanced_objects(text, QuoteStyle::Double)
        .into_iter()
        .filter(|span| text[span.clone()].contains(ENVELOPE_VERSION))
        .filter_map(|span| {
            let slice = &text[span.clone()];
            let value = serde_json::from_str::<Value>(slice).unwrap_or_else(|_| parse_lenient(slice));
            find_envelope(&value, 0).map(|call| TextMatch { call, span })
        })
        .collect();

    if matches.is_empty() {
        tracing::debug!(target: "rcc::extract", "envelope marker present but no valid envelope");
        None
    } else {
        Some(matches)
    }
}

/// Depth-first search for the first valid envelope inside `value`.
fn find_envelope(value: &Value, depth: usize) -> Option<ToolCallLite> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if map.get("version").and_then(Value::as_str) == Some(ENVELOPE_VERSION)
                && let Some(call) = envelope_call(value)
            {
                return Some(call);
            }
            map.values().find_map(|v| find_envelope(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_envelope(v, depth + 1)),
        Value::String(s)
            if s.contains(ENVELOPE_VERSION) && s.trim_start().starts_with(['{', '[']) =>
        {
            let inner = serde_json::from_str::<Value>(s).ok()?;
            find_envelope(&inner, depth + 1)
        }
        _ => None,
    }
}

fn envelope_call(envelope: &Value) -> Option<ToolCallLite> {
    let tool = envelope.get("tool")?;
    let name = tool.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }
    let args = envelope
        .get("arguments")
        .cloned()
        .filter(|a| !a.is_null())
        .unwrap_or_else(|| Value::Object(Default::default()));

    let mut call = ToolCallLite::new(name, args);
    if let Some(id) = tool
        .get("call_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        call = call.with_id(id);
    }
    Some(call)
}
