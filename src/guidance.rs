//! Tool-use guidance for outgoing requests
//!
//! Some upstream models ignore the native tool channel and write calls as
//! prose. When enabled, a short system message reminding the model how to call
//! tools is added to requests that declare tools.

use serde_json::{Value, json};

use crate::config::ShapeConfig;
use crate::envelope::declared_tool_names;

/// First line of the injected message; its presence makes injection a no-op.
pub const GUIDANCE_MARKER: &str = "[rcc tool guidance]";

/// Build the guidance text for the given tool names.
pub fn guidance_text(tool_names: &[String]) -> String {
    let mut text = String::from(GUIDANCE_MARKER);
    text.push('\n');
    text.push_str("Call tools only through the native tool_calls channel. ");
    text.push_str("Do not describe a call in prose, markdown or XML tags.\n");
    text.push_str("Send arguments as one JSON object that matches the tool's schema.\n");
    if tool_names.iter().any(|n| crate::normalize::is_shell_tool(n)) {
        text.push_str(
            "Shell tools take `command` as an array of words, e.g. [\"ls\", \"-la\"], and `workdir` instead of a leading `cd`.\n",
        );
    }
    if tool_names.iter().any(|n| n == "apply_patch") {
        text.push_str(
            "apply_patch takes the whole `*** Begin Patch` ... `*** End Patch` block in `patch`.\n",
        );
    }
    text.push_str("Available tools: ");
    text.push_str(&tool_names.join(", "));
    text
}

/// Insert the guidance system message after the leading system messages.
///
/// Returns true if the request was modified. Requests without declared tools,
/// requests that already carry the guidance, and a disabled toggle are left alone.
pub fn inject_tool_guidance(request: &mut Value, config: &ShapeConfig) -> bool {
    if !config.tool_guidance {
        return false;
    }
    let names = request
        .get("tools")
        .map(declared_tool_names)
        .unwrap_or_default();
    if names.is_empty() {
        return false;
    }
    let Some(messages) = request.get_mut("messages").and_then(Value::as_array_mut) else {
        return false;
    };

    let already = messages.iter().any(|m| {
        m.get("content")
            .and_then(Value::as_str)
            .is_some_and(|c| c.starts_with(GUIDANCE_MARKER))
    });
    if already {
        return false;
    }

    let position = messages
        .iter()
        .take_while(|m| m.get("role").and_then(Value::as_str) == Some("system"))
        .count();
    messages.insert(
        position,
        json!({"role": "system", "content": guidance_text(&names)}),
    );
    tracing::debug!(target: "rcc::guidance", tools = names.len(), "injected tool guidance");
    true
}
