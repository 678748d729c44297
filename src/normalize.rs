//! Batch normalization of chat-completion responses
//!
//! Repairs the tool-call shape of a complete `chat.completion` payload:
//!
//! - every `tool_calls[]` entry gets an id, `type: "function"` and a JSON
//!   string in `function.arguments`
//! - arguments that are not valid JSON are repaired with the lenient parser
//! - shell-family tools get their arguments packed
//! - with text-markup compatibility on, tool calls written as prose are
//!   recovered and installed as `tool_calls`
//!
//! Normalizing an already-normalized payload changes nothing. A payload that
//! cannot be processed is left exactly as it was.

use serde_json::{Map, Value};

use crate::config::ShapeConfig;
use crate::error::{Result, ShapeError};
use crate::extract::extract_with_residual;
use crate::lenient::parse_lenient_object;
use crate::shell::pack_shell_value;
use crate::utils::new_call_id;

/// Tool names whose arguments are shell commands.
pub const SHELL_TOOL_NAMES: &[&str] = &["shell", "bash", "exec_command", "execute"];

/// What a normalization pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub ids_generated: usize,
    pub types_fixed: usize,
    pub arguments_repaired: usize,
    pub shell_packed: usize,
    pub calls_extracted: usize,
}

impl NormalizeReport {
    /// Whether the pass modified the payload.
    pub fn changed(&self) -> bool {
        *self != Self::default()
    }
}

pub fn is_shell_tool(name: &str) -> bool {
    SHELL_TOOL_NAMES.contains(&name)
}

/// Normalize a chat-completion response in place.
pub fn normalize_chat_response(response: &mut Value, config: &ShapeConfig) -> NormalizeReport {
    let mut working = response.clone();
    let mut report = NormalizeReport::default();

    match normalize_choices(&mut working, config, &mut report) {
        Ok(()) => {
            if report.changed() {
                tracing::debug!(target: "rcc::normalize", ?report, "normalized chat response");
                *response = working;
            }
            report
        }
        Err(e) => {
            tracing::warn!(target: "rcc::normalize", error = %e, "normalization failed; payload left unchanged");
            NormalizeReport::default()
        }
    }
}

fn normalize_choices(
    response: &mut Value,
    config: &ShapeConfig,
    report: &mut NormalizeReport,
) -> Result<()> {
    let Some(choices) = response.get_mut("choices").and_then(Value::as_array_mut) else {
        return Ok(());
    };

    for choice in choices.iter_mut().filter_map(Value::as_object_mut) {
        let extracted = match choice.get_mut("message").and_then(Value::as_object_mut) {
            Some(message) => normalize_message(message, config, report)?,
            None => false,
        };
        if extracted {
            choice.insert(
                "finish_reason".to_string(),
                Value::String("tool_calls".to_string()),
            );
        }
    }
    Ok(())
}

/// Returns true when calls were recovered from text.
fn normalize_message(
    message: &mut Map<String, Value>,
    config: &ShapeConfig,
    report: &mut NormalizeReport,
) -> Result<bool> {
    if let Some(Value::Array(calls)) = message.get_mut("tool_calls")
        && !calls.is_empty()
    {
        for call in calls.iter_mut() {
            normalize_tool_call(call, config, report)?;
        }
        return Ok(false);
    }

    if !config.text_markup_compat {
        return Ok(false);
    }
    let Some(text) = message_text(message) else {
        return Ok(false);
    };
    let Some(extraction) = extract_with_residual(&text) else {
        return Ok(false);
    };

    let mut calls = Vec::with_capacity(extraction.calls.len());
    for lite in &extraction.calls {
        let mut call = lite.to_openai_tool_call();
        normalize_tool_call(&mut call, config, report)?;
        calls.push(call);
    }
    report.calls_extracted += calls.len();

    message.insert("tool_calls".to_string(), Value::Array(calls));
    message.insert(
        "content".to_string(),
        extraction.residual.map(Value::String).unwrap_or(Value::Null),
    );
    Ok(true)
}

fn message_text(message: &Map<String, Value>) -> Option<String> {
    match message.get("content")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (!joined.trim().is_empty()).then_some(joined)
        }
        _ => None,
    }
}

/// Normalize one OpenAI `tool_calls[]` entry.
pub fn normalize_tool_call(
    call: &mut Value,
    config: &ShapeConfig,
    report: &mut NormalizeReport,
) -> Result<()> {
    if !call.is_object() {
        return Err(ShapeError::Internal(format!(
            "tool call is not an object: {call}"
        )));
    }
    let Some(obj) = call.as_object_mut() else {
        return Ok(());
    };

    let has_id = obj
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if !has_id {
        obj.insert("id".to_string(), Value::String(new_call_id()));
        report.ids_generated += 1;
    }

    if obj.get("type").and_then(Value::as_str).is_none() {
        obj.insert("type".to_string(), Value::String("function".to_string()));
        report.types_fixed += 1;
    }

    // Some upstreams flatten `name`/`arguments` onto the call itself.
    if !obj.get("function").is_some_and(Value::is_object) {
        let mut function = Map::new();
        if let Some(name) = obj.remove("name") {
            function.insert("name".to_string(), name);
        }
        if let Some(arguments) = obj.remove("arguments") {
            function.insert("arguments".to_string(), arguments);
        }
        obj.insert("function".to_string(), Value::Object(function));
        report.types_fixed += 1;
    }

    let Some(function) = obj.get_mut("function").and_then(Value::as_object_mut) else {
        return Ok(());
    };
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (mut args, mut rewrite) = match function.get("arguments") {
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v) => (v, false),
            Err(_) => (parse_lenient_object(s), true),
        },
        Some(Value::Null) | None => (Value::Object(Map::new()), true),
        Some(v @ (Value::Object(_) | Value::Array(_))) => (v.clone(), true),
        Some(other) => (parse_lenient_object(&other.to_string()), true),
    };
    if rewrite {
        report.arguments_repaired += 1;
    }

    if is_shell_tool(&name)
        && let Some(packed) = pack_shell_value(&args, config.shell_wrap)
        && packed != args
    {
        args = packed;
        rewrite = true;
        report.shell_packed += 1;
    }

    if rewrite {
        function.insert(
            "arguments".to_string(),
            Value::String(serde_json::to_string(&args)?),
        );
    }
    Ok(())
}
