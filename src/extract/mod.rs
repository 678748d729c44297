//! Tool-call text extraction
//!
//! Recovers structured tool calls from assistant text when a model wrote its
//! call as prose instead of using the native tool-call channel. Strategies are
//! tried in a fixed order and the first one that matches anything wins; later
//! strategies never see text the earlier one already claimed.

use std::ops::Range;

use crate::types::ToolCallLite;
use crate::utils::new_call_id;

pub mod envelope_scan;
pub mod execute;
pub mod patch;

/// One recovered call and the byte span of the markup it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub call: ToolCallLite,
    pub span: Range<usize>,
}

/// A pure extraction strategy.
pub type Strategy = fn(&str) -> Option<Vec<TextMatch>>;

/// Strategies in priority order.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("rcc.tool.v1", envelope_scan::scan),
    ("apply_patch", patch::scan),
    ("execute", execute::scan),
];

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Recovered calls, every one carrying an id.
    pub calls: Vec<ToolCallLite>,
    /// The text with the matched markup removed, `None` if nothing remains.
    pub residual: Option<String>,
    /// Name of the strategy that matched.
    pub strategy: &'static str,
}

/// Recover tool calls from text.
pub fn extract_tool_calls(text: &str) -> Option<Vec<ToolCallLite>> {
    extract_with_residual(text).map(|e| e.calls)
}

/// Recover tool calls from text, also returning the remaining prose.
pub fn extract_with_residual(text: &str) -> Option<Extraction> {
    let (strategy, mut matches) = STRATEGIES
        .iter()
        .find_map(|(name, scan)| scan(text).map(|m| (*name, m)))?;

    matches.sort_by_key(|m| m.span.start);

    let mut residual = String::with_capacity(text.len());
    let mut cursor = 0;
    for m in &matches {
        if m.span.start >= cursor {
            residual.push_str(&text[cursor..m.span.start]);
        }
        cursor = cursor.max(m.span.end);
    }
    residual.push_str(&text[cursor.min(text.len())..]);

    let calls: Vec<ToolCallLite> = matches
        .into_iter()
        .map(|m| {
            let mut call = m.call;
            if call.id.is_none() {
                call.id = Some(new_call_id());
            }
            call
        })
        .collect();

    tracing::debug!(
        target: "rcc::extract",
        strategy,
        count = calls.len(),
        "recovered tool calls from text"
    );

    Some(Extraction {
        calls,
        residual: tidy_residual(&residual),
        strategy,
    })
}

/// Trim the leftover prose and collapse the blank-line runs left behind by
/// removed blocks.
fn tidy_residual(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.trim().lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    let out = out.trim_end().to_string();
    (!out.is_empty()).then_some(out)
}
