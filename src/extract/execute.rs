//! `<function=execute><parameter=command>...</parameter></function>` tags

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

use super::TextMatch;
use crate::types::ToolCallLite;

lazy_static! {
    static ref EXECUTE_TAG: Regex = Regex::new(
        r"(?s)<function=execute>\s*<parameter=command>(.*?)</parameter>\s*</function>"
    )
    .expect("valid execute regex");
}

pub fn scan(text: &str) -> Option<Vec<TextMatch>> {
    if !text.contains("<function=execute>") {
        return None;
    }

    let matches: Vec<TextMatch> = EXECUTE_TAG
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            // Raw text; only the line breaks framing the parameter are dropped.
            let command = caps.get(1)?.as_str().trim_matches(['\r', '\n']);
            if command.trim().is_empty() {
                return None;
            }
            Some(TextMatch {
                call: ToolCallLite::new("shell", json!({ "command": command })),
                span: whole.range(),
            })
        })
        .collect();

    (!matches.is_empty()).then_some(matches)
}
