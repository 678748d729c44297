//! Utility modules for rcc-shape
//!
//! Small building blocks shared by the parser, extractor and streaming layers.

pub mod cancel;
pub mod ids;
pub mod json_scan;
pub mod mime;

pub use cancel::CancelHandle;
pub use ids::{new_call_id, new_message_id};
pub use json_scan::QuoteStyle;
