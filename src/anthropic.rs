//! Batch conversion of a chat completion into an Anthropic message

use serde_json::{Map, Value, json};

use crate::config::ShapeConfig;
use crate::lenient::parse_lenient_object;
use crate::normalize::normalize_chat_response;
use crate::types::map_finish_reason;
use crate::utils::new_message_id;

/// Convert a complete `chat.completion` payload into an Anthropic Messages response.
///
/// The payload is normalized first, so tool calls written as prose come out
/// as `tool_use` blocks. Only the first choice is converted.
pub fn chat_response_to_anthropic(response: &Value, config: &ShapeConfig) -> Value {
    let mut normalized = response.clone();
    normalize_chat_response(&mut normalized, config);

    let choice = normalized
        .pointer("/choices/0")
        .cloned()
        .unwrap_or(Value::Null);
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message_text(&message)
        && !text.is_empty()
    {
        content.push(json!({"type": "text", "text": text}));
    }

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for call in &tool_calls {
        content.push(tool_use_block(call));
    }

    let stop_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some(reason) => map_finish_reason(reason),
        None if !tool_calls.is_empty() => "tool_use".to_string(),
        None => "end_turn".to_string(),
    };

    let usage = normalized.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    json!({
        "id": normalized
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(new_message_id),
        "type": "message",
        "role": "assistant",
        "model": normalized.get("model").and_then(Value::as_str).unwrap_or("unknown"),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": tokens("prompt_tokens"),
            "output_tokens": tokens("completion_tokens"),
        }
    })
}

fn message_text(message: &Value) -> Option<String> {
    match message.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

fn tool_use_block(call: &Value) -> Value {
    let input = match call.pointer("/function/arguments") {
        Some(Value::String(s)) => parse_lenient_object(s),
        Some(v @ Value::Object(_)) => v.clone(),
        _ => Value::Object(Map::new()),
    };
    json!({
        "type": "tool_use",
        "id": call.get("id").and_then(Value::as_str).unwrap_or_default(),
        "name": call.pointer("/function/name").and_then(Value::as_str).unwrap_or_default(),
        "input": input,
    })
}
