//! Error types for rcc-shape
//!
//! Most stages in this crate are best-effort and never surface an error to the
//! caller: malformed input degrades to a defined fallback instead. `ShapeError`
//! covers the few places where a failure has to be reported, mainly the
//! streaming edges (upstream source, downstream sink) and configuration.

use thiserror::Error;

/// Errors that can occur while shaping or transcoding a payload
#[derive(Error, Debug)]
pub enum ShapeError {
    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// The upstream byte source failed mid-stream
    #[error("Upstream stream error: {0}")]
    Upstream(String),

    /// The downstream sink rejected a frame (client went away)
    #[error("Sink error: {0}")]
    Sink(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShapeError {
    /// Whether the error originated upstream of this crate.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

impl From<serde_json::Error> for ShapeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for ShapeError {
    fn from(err: std::io::Error) -> Self {
        Self::Upstream(err.to_string())
    }
}

/// Result type for rcc-shape operations
pub type Result<T> = std::result::Result<T, ShapeError>;
