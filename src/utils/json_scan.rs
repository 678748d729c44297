//! Quote/escape-aware bracket scanner
//!
//! Locates balanced `{...}` / `[...]` regions inside free text without
//! parsing them. Brackets that appear inside string literals are ignored, and
//! a backslash inside a string escapes the next character. Mismatched closers
//! (`{ ]`) abort the candidate region.

use std::ops::Range;

/// Which characters open a string literal while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// JSON: only `"` delimits strings.
    Double,
    /// JSON-ish: both `"` and `'` delimit strings.
    DoubleAndSingle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    InString { quote: u8 },
    Escape { quote: u8 },
}

/// Find the exclusive end of the balanced region opening at `start`.
///
/// `start` must index a `{` or `[` byte; returns `None` if the region never
/// closes or closes with the wrong bracket.
pub fn balanced_end(text: &str, start: usize, quotes: QuoteStyle) -> Option<usize> {
    let bytes = text.as_bytes();
    match bytes.get(start) {
        Some(b'{') | Some(b'[') => {}
        _ => return None,
    }

    let mut stack: Vec<u8> = Vec::new();
    let mut state = ScanState::Code;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        state = match state {
            ScanState::Escape { quote } => ScanState::InString { quote },
            ScanState::InString { quote } => {
                if b == b'\\' {
                    ScanState::Escape { quote }
                } else if b == quote {
                    ScanState::Code
                } else {
                    state
                }
            }
            ScanState::Code => match b {
                b'"' => ScanState::InString { quote: b },
                b'\'' if quotes == QuoteStyle::DoubleAndSingle => ScanState::InString { quote: b },
                b'{' => {
                    stack.push(b'}');
                    state
                }
                b'[' => {
                    stack.push(b']');
                    state
                }
                b'}' | b']' => {
                    if stack.pop() != Some(b) {
                        return None;
                    }
                    if stack.is_empty() {
                        return Some(start + offset + 1);
                    }
                    state
                }
                _ => state,
            },
        };
    }

    None
}

/// The first balanced `{...}` or `[...]` substring, if any.
pub fn first_balanced(text: &str, quotes: QuoteStyle) -> Option<&str> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(i, _)| balanced_end(text, i, quotes).map(|end| &text[i..end]))
}

/// All top-level balanced `{...}` regions, left to right, non-overlapping.
pub fn balanced_objects(text: &str, quotes: QuoteStyle) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find('{') {
        let start = cursor + rel;
        match balanced_end(text, start, quotes) {
            Some(end) => {
                out.push(start..end);
                cursor = end;
            }
            None => cursor = start + 1,
        }
    }
    out
}
