//! Configuration for the shaping pipeline
//!
//! A `ShapeConfig` is built once (from defaults, a deserialized settings
//! document, or the process environment) and then passed explicitly into every
//! call that needs it. Nothing in this crate reads process-wide state on its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Default coalescing window for streamed text deltas.
pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 1000;

/// Default request-correlation header name.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// How SSE events are framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SseFraming {
    /// `event: <type>\ndata: <json>\n\n`
    #[default]
    EventAndData,
    /// `data: <json>\n\n`
    DataOnly,
}

/// Whether shell-like tool commands get wrapped in an explicit shell invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellWrapPolicy {
    /// Keep tokens verbatim.
    #[default]
    Never,
    /// Wrap a single command string in `bash -lc` when it contains control operators.
    ControlOperators,
}

/// Settings threaded through the normalizer, transcoder and orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeConfig {
    /// Minimum wall-clock gap between emitted text deltas, in milliseconds.
    ///
    /// `0` disables coalescing. Default: `1000`
    pub coalesce_window_ms: u64,

    /// SSE framing used by the emitter.
    ///
    /// Default: `SseFraming::EventAndData`
    pub framing: SseFraming,

    /// Inject a tool-usage guidance system message into requests that declare tools.
    ///
    /// Default: `false`
    pub tool_guidance: bool,

    /// Recover tool calls that models wrote as text markup (rcc.tool.v1 envelopes,
    /// patch blocks, execute tags).
    ///
    /// Default: `true`
    pub text_markup_compat: bool,

    /// Shell wrapping policy applied to packed shell arguments.
    ///
    /// Default: `ShellWrapPolicy::Never`
    pub shell_wrap: ShellWrapPolicy,

    /// Header carrying the request correlation id on live SSE responses.
    ///
    /// Default: `x-request-id`
    pub request_id_header: String,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
            framing: SseFraming::EventAndData,
            tool_guidance: false,
            text_markup_compat: true,
            shell_wrap: ShellWrapPolicy::Never,
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
        }
    }
}

impl ShapeConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from the process environment once.
    ///
    /// Recognized variables: `RCC_SSE_COALESCE_MS`, `RCC_SSE_DATA_ONLY`,
    /// `RCC_TOOL_GUIDANCE`, `RCC_TEXT_MARKUP_COMPAT`, `RCC_SHELL_WRAP`.
    /// Unset variables keep their defaults; malformed values are rejected.
    pub fn from_env() -> Result<Self, ShapeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ShapeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("RCC_SSE_COALESCE_MS") {
            cfg.coalesce_window_ms = raw.trim().parse().map_err(|_| {
                ShapeError::Config(format!("RCC_SSE_COALESCE_MS is not a number: {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup("RCC_SSE_DATA_ONLY")
            && parse_flag("RCC_SSE_DATA_ONLY", &raw)?
        {
            cfg.framing = SseFraming::DataOnly;
        }
        if let Some(raw) = lookup("RCC_TOOL_GUIDANCE") {
            cfg.tool_guidance = parse_flag("RCC_TOOL_GUIDANCE", &raw)?;
        }
        if let Some(raw) = lookup("RCC_TEXT_MARKUP_COMPAT") {
            cfg.text_markup_compat = parse_flag("RCC_TEXT_MARKUP_COMPAT", &raw)?;
        }
        if let Some(raw) = lookup("RCC_SHELL_WRAP") {
            cfg.shell_wrap = if parse_flag("RCC_SHELL_WRAP", &raw)? {
                ShellWrapPolicy::ControlOperators
            } else {
                ShellWrapPolicy::Never
            };
        }

        Ok(cfg)
    }

    /// Parse from a JSON settings document (unknown keys are ignored).
    pub fn from_json(value: serde_json::Value) -> Result<Self, ShapeError> {
        serde_json::from_value(value).map_err(|e| ShapeError::Config(e.to_string()))
    }

    pub fn with_coalesce_window_ms(mut self, ms: u64) -> Self {
        self.coalesce_window_ms = ms;
        self
    }

    pub fn with_framing(mut self, framing: SseFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_tool_guidance(mut self, enabled: bool) -> Self {
        self.tool_guidance = enabled;
        self
    }

    pub fn with_text_markup_compat(mut self, enabled: bool) -> Self {
        self.text_markup_compat = enabled;
        self
    }

    pub fn with_shell_wrap(mut self, policy: ShellWrapPolicy) -> Self {
        self.shell_wrap = policy;
        self
    }

    pub fn with_request_id_header(mut self, header: impl Into<String>) -> Self {
        self.request_id_header = header.into();
        self
    }

    /// Coalescing window as a `Duration`.
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ShapeError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ShapeError::Config(format!(
            "{key} is not a boolean flag: {other:?}"
        ))),
    }
}
