//! Streaming Module
//!
//! OpenAI SSE in, Anthropic SSE out:
//! - frame reader: bytes to JSON payloads
//! - transcoder: OpenAI chunks to Anthropic events
//! - emitter: events to SSE frames, plus the downstream sink seam
//! - orchestrator: drives one request end to end

mod emitter;
mod frame_reader;
mod orchestrator;
mod transcoder;

pub use emitter::*;
pub use frame_reader::*;
pub use orchestrator::*;
pub use transcoder::*;
