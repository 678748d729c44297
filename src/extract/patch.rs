//! `*** Begin Patch ... *** End Patch` blocks
//!
//! A block may be bare, fenced (```` ```diff ````), or written as an
//! `apply_patch <<'EOF'` heredoc. The wrapper belongs to the matched span so it
//! does not linger in the residual prose; only the block itself is the patch.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

use super::TextMatch;
use crate::types::ToolCallLite;

pub const BEGIN_MARKER: &str = "*** Begin Patch";
pub const END_MARKER: &str = "*** End Patch";

lazy_static! {
    static ref PATCH_BLOCK: Regex = Regex::new(concat!(
        r"(?s)",
        r"(?:```[A-Za-z0-9_+\-]*[ \t]*\r?\n)?",
        r"(?:apply_patch[ \t]*<<-?[ \t]*'?EOF'?[ \t]*\r?\n)?",
        r"(\*\*\* Begin Patch.*?\*\*\* End Patch)",
        r"(?:[ \t]*\r?\nEOF\b)?",
        r"(?:[ \t]*\r?\n?```)?",
    ))
    .expect("valid patch regex");
}

pub fn scan(text: &str) -> Option<Vec<TextMatch>> {
    if !text.contains(BEGIN_MARKER) {
        return None;
    }

    let matches: Vec<TextMatch> = PATCH_BLOCK
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let block = caps.get(1)?;
            Some(TextMatch {
                call: ToolCallLite::new("apply_patch", json!({ "patch": block.as_str() })),
                span: whole.range(),
            })
        })
        .collect();

    (!matches.is_empty()).then_some(matches)
}
