//! Wire data model: OpenAI chunks, Anthropic events, tool shapes

mod chunk;
mod events;
mod tools;

pub use chunk::*;
pub use events::*;
pub use tools::*;
