//! `rcc.tool.v1` envelopes and self-repair hints
//!
//! Problems with a tool call the model produced (no name, an undeclared tool,
//! arguments that do not parse, an image tool pointed at a non-image file)
//! are model-recoverable. Instead of failing the request they are reported
//! back to the model as a failed tool result whose `stderr` and
//! `output.hint` explain how to fix the call.

use serde_json::{Value, json};
use thiserror::Error;

use crate::lenient::parse_lenient_object;
use crate::types::{
    ENVELOPE_VERSION, EnvelopeExecuted, EnvelopeResult, EnvelopeTool, ShellArgs, ToolEnvelope,
};
use crate::utils::mime::is_image_path;

/// Argument keys that name the file an image tool should open.
const IMAGE_PATH_KEYS: &[&str] = &["path", "image_path", "file", "file_path", "url", "image"];

/// A model-recoverable problem with a tool call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallIssue {
    #[error("tool call has no function name")]
    MissingName,
    #[error("unknown tool `{name}`")]
    UnknownTool { name: String, available: Vec<String> },
    #[error("arguments for `{name}` are not valid JSON: {detail}")]
    ArgumentParse { name: String, detail: String },
    #[error("`{name}` only accepts image files, got `{path}`")]
    ImageToolMisuse { name: String, path: String },
}

impl ToolCallIssue {
    /// Stable identifier, written to `result.output.issue`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingName => "missing_name",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::ArgumentParse { .. } => "argument_parse",
            Self::ImageToolMisuse { .. } => "image_tool_misuse",
        }
    }

    /// Instruction for the model on how to correct the call.
    pub fn hint(&self) -> String {
        match self {
            Self::MissingName => {
                "Set `function.name` to one of the declared tools and call it again.".to_string()
            }
            Self::UnknownTool { available, .. } if available.is_empty() => {
                "No tools are declared for this conversation; answer in plain text.".to_string()
            }
            Self::UnknownTool { available, .. } => format!(
                "Call one of the declared tools instead: {}.",
                available.join(", ")
            ),
            Self::ArgumentParse { .. } => {
                "Send `function.arguments` as a single JSON object string, for example {\"command\": [\"ls\"]}."
                    .to_string()
            }
            Self::ImageToolMisuse { .. } => {
                "This tool only opens images (png, jpg, gif, webp...). Use a file-reading or shell tool for other files."
                    .to_string()
            }
        }
    }
}

impl ToolEnvelope {
    /// A successful result envelope.
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            version: ENVELOPE_VERSION.to_string(),
            tool: EnvelopeTool {
                name: name.into(),
                call_id: call_id.into(),
            },
            arguments,
            executed: None,
            result: EnvelopeResult::default(),
            meta: json!({}),
        }
    }

    /// A failed result envelope carrying a repair hint.
    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
        stderr: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::success(call_id, name, arguments);
        envelope.result = EnvelopeResult {
            success: false,
            stderr: Some(stderr.into()),
            output: json!({ "hint": hint.into() }),
            ..EnvelopeResult::default()
        };
        envelope
    }

    /// Record the command that was actually run.
    pub fn with_executed(mut self, shell: &ShellArgs) -> Self {
        self.executed = Some(EnvelopeExecuted {
            command: shell.command.clone(),
            workdir: shell.workdir.clone(),
        });
        self
    }

    pub fn with_result(mut self, result: EnvelopeResult) -> Self {
        self.result = result;
        self
    }

    /// The `role: "tool"` message persisting this envelope.
    ///
    /// `call_id` overrides the envelope's own call id when given.
    pub fn to_tool_message(&self, call_id: Option<&str>) -> Value {
        let id = call_id.unwrap_or(&self.tool.call_id);
        let content = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        json!({
            "role": "tool",
            "tool_call_id": id,
            "content": content,
        })
    }
}

/// Tool names declared in an OpenAI request `tools` array.
pub fn declared_tool_names(tools: &Value) -> Vec<String> {
    tools
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|t| {
                    t.pointer("/function/name")
                        .or_else(|| t.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Check one OpenAI `tool_calls[]` entry against the declared tools.
///
/// An empty `declared` list skips the unknown-tool check.
pub fn validate_tool_call(call: &Value, declared: &[String]) -> Option<ToolCallIssue> {
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        return Some(ToolCallIssue::MissingName);
    }

    if !declared.is_empty() && !declared.iter().any(|d| d == name) {
        return Some(ToolCallIssue::UnknownTool {
            name: name.to_string(),
            available: declared.to_vec(),
        });
    }

    let args = match call.pointer("/function/arguments") {
        Some(Value::String(s)) if s.trim().is_empty() => json!({}),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v) if v.is_object() => v,
            Ok(_) => {
                return Some(ToolCallIssue::ArgumentParse {
                    name: name.to_string(),
                    detail: "expected a JSON object".to_string(),
                });
            }
            Err(e) => {
                return Some(ToolCallIssue::ArgumentParse {
                    name: name.to_string(),
                    detail: e.to_string(),
                });
            }
        },
        Some(v @ Value::Object(_)) => v.clone(),
        _ => json!({}),
    };

    if name.contains("image")
        && let Some(path) = IMAGE_PATH_KEYS
            .iter()
            .find_map(|k| args.get(*k).and_then(Value::as_str))
        && !is_image_path(path)
    {
        return Some(ToolCallIssue::ImageToolMisuse {
            name: name.to_string(),
            path: path.to_string(),
        });
    }

    None
}

/// Failure envelope describing `issue` for `call`.
pub fn repair_envelope(call: &Value, issue: &ToolCallIssue) -> ToolEnvelope {
    let call_id = call
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let name = call
        .pointer("/function/name")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("unknown");
    let arguments = match call.pointer("/function/arguments") {
        Some(Value::String(s)) => parse_lenient_object(s),
        Some(v) => v.clone(),
        None => json!({}),
    };

    let mut envelope =
        ToolEnvelope::failure(call_id, name, arguments, issue.to_string(), issue.hint());
    if let Some(output) = envelope.result.output.as_object_mut() {
        output.insert("issue".to_string(), Value::String(issue.kind().to_string()));
    }
    envelope
}

/// Tool messages for every invalid call in `calls`, in order.
pub fn repair_messages(calls: &[Value], declared: &[String]) -> Vec<Value> {
    calls
        .iter()
        .filter_map(|call| {
            let issue = validate_tool_call(call, declared)?;
            tracing::debug!(target: "rcc::normalize", issue = issue.kind(), "tool call needs repair");
            Some(repair_envelope(call, &issue).to_tool_message(None))
        })
        .collect()
}
