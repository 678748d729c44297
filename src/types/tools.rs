//! Tool call, shell argument and rcc.tool.v1 envelope types

use serde::{Deserialize, Serialize};

/// Version tag of the self-describing tool envelope.
pub const ENVELOPE_VERSION: &str = "rcc.tool.v1";

/// Canonical extracted tool call, independent of the format it was found in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCallLite {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// OpenAI `tool_calls[]` entry with JSON-string arguments.
    ///
    /// Callers are expected to have assigned an id already; an absent id is
    /// written as an empty string.
    pub fn to_openai_tool_call(&self) -> serde_json::Value {
        let arguments = match &self.args {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        serde_json::json!({
            "id": self.id.clone().unwrap_or_default(),
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": arguments,
            }
        })
    }
}

/// Normalized shell arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellArgs {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// `rcc.tool.v1` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub version: String,
    pub tool: EnvelopeTool,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<EnvelopeExecuted>,
    #[serde(default)]
    pub result: EnvelopeResult,
    #[serde(default = "empty_object")]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeTool {
    pub name: String,
    #[serde(default)]
    pub call_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeExecuted {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default)]
    pub output: serde_json::Value,
}

impl Default for EnvelopeResult {
    fn default() -> Self {
        Self {
            success: true,
            exit_code: None,
            duration_seconds: None,
            stdout: None,
            stderr: None,
            output: serde_json::Value::Null,
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}
