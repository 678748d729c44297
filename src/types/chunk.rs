//! OpenAI-style streaming chunk types
//!
//! Every field is optional on the wire. Providers that speak "OpenAI-compatible"
//! routinely omit ids, send `null` for empty fields, or deliver `content` as an
//! array of parts, so deserialization here is deliberately forgiving.

use serde::{Deserialize, Deserializer, Serialize};

/// One `chat.completion.chunk` object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<ChunkUsage>,
}

/// One entry of `choices[]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default, alias = "message")]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// `choices[].delta`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// `choices[].delta.tool_calls[]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

/// `tool_calls[].function`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Token usage as reported by OpenAI-compatible upstreams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl Chunk {
    /// Parse a chunk from an already-decoded JSON value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Chunk::deserialize(value)
    }

    /// Whether a decoded object looks like an OpenAI streaming chunk.
    ///
    /// `object == "chat.completion.chunk"`, or `choices[0]` carries `delta`/`message`.
    pub fn looks_like_chunk(value: &serde_json::Value) -> bool {
        if value.get("object").and_then(|v| v.as_str()) == Some("chat.completion.chunk") {
            return true;
        }
        value
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .is_some_and(|first| first.get("delta").is_some() || first.get("message").is_some())
    }

    /// The first choice, which is the only one the transcoder follows.
    pub fn first_choice(&self) -> Option<&ChunkChoice> {
        self.choices.first()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept `"text"`, `null`, or `[{"type":"text","text":"..."}, "..."]`.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Array(parts)) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| match p {
                    serde_json::Value::String(s) => Some(s.as_str()),
                    other => other.get("text").and_then(|t| t.as_str()),
                })
                .collect();
            Some(joined)
        }
        Some(other) => Some(other.to_string()),
    })
}
