//! rcc-shape
//!
//! Shape-and-repair core for a multi-provider LLM gateway.
//!
//! - [`streaming`]: transcode an OpenAI chat-completions SSE stream into an
//!   Anthropic Messages SSE stream
//! - [`extract`]: recover tool calls that a model wrote as text
//! - [`normalize`]: repair tool calls in non-streaming chat responses
//! - [`shell`]: pack free-form shell commands into an argv array
//! - [`lenient`]: parse JSON-ish model output into an object
#![deny(unsafe_code)]

pub mod anthropic;
pub mod config;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod guidance;
pub mod lenient;
pub mod normalize;
pub mod shell;
pub mod streaming;
pub mod types;
pub mod utils;

pub use config::{ShapeConfig, ShellWrapPolicy, SseFraming};
pub use error::{Result, ShapeError};

/// Commonly used items
pub mod prelude {
    pub use crate::anthropic::chat_response_to_anthropic;
    pub use crate::config::{ShapeConfig, ShellWrapPolicy, SseFraming};
    pub use crate::envelope::{ToolCallIssue, repair_messages, validate_tool_call};
    pub use crate::error::{Result, ShapeError};
    pub use crate::extract::{extract_tool_calls, extract_with_residual};
    pub use crate::guidance::inject_tool_guidance;
    pub use crate::lenient::{parse_lenient, parse_lenient_object};
    pub use crate::normalize::normalize_chat_response;
    pub use crate::shell::pack_shell_args;
    pub use crate::streaming::{
        BufferSink, ChannelSink, SseEmitter, SseSink, StreamOrchestrator, Transcoder,
        read_frames, sse_response_headers, transcode_response, transcode_stream,
    };
    pub use crate::types::{AnthEvent, Chunk, ShellArgs, ToolCallLite, ToolEnvelope};
}
