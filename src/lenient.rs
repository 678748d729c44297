//! Lenient JSON-ish parser
//!
//! Models frequently emit "almost JSON" as tool arguments: wrapped in a code
//! fence, surrounded by prose, with single quotes, bare keys, trailing commas or
//! Python literals, or as plain `key=value` lines. [`parse_lenient`] coerces all
//! of these into a [`serde_json::Value`] and never fails; the worst case is
//! `{"_raw": <original>}`.
//!
//! Attempts run in a fixed order and the first one that yields a value wins:
//!
//! 1. strict JSON
//! 2. the body of one fenced code block
//! 3. the first balanced `{...}` / `[...]` region
//! 4. that region (or text opening with `{` / `[`) repaired by `jsonrepair`
//! 5. `key=value` / `key: value` pairs
//! 6. `{"_raw": <original>}`

use jsonrepair::{Options, repair_json};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::utils::json_scan::{QuoteStyle, first_balanced};

/// Key used when the input could not be coerced at all.
pub const RAW_KEY: &str = "_raw";

lazy_static! {
    static ref FENCE: Regex =
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n?(.*?)```").expect("valid fence regex");
    static ref PAIR_KEY: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid key regex");
}

/// Coerce arbitrary text into a JSON value.
///
/// Blank input yields an empty object.
pub fn parse_lenient(input: &str) -> Value {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Value::Object(Map::new());
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return v;
    }

    let fenced = strip_fence(trimmed);
    if let Some(body) = fenced
        && let Ok(v) = serde_json::from_str::<Value>(body)
    {
        tracing::trace!(target: "rcc::lenient", "recovered from fenced block");
        return v;
    }
    let candidate = fenced.unwrap_or(trimmed);

    let balanced = first_balanced(candidate, QuoteStyle::DoubleAndSingle)
        .or_else(|| first_balanced(candidate, QuoteStyle::Double));
    if let Some(region) = balanced
        && let Ok(v) = serde_json::from_str::<Value>(region)
    {
        tracing::trace!(target: "rcc::lenient", "recovered from balanced region");
        return v;
    }

    let structured = balanced.or_else(|| candidate.starts_with(['{', '[']).then_some(candidate));
    if let Some(region) = structured
        && let Some(v) = repair_structured(region)
    {
        tracing::trace!(target: "rcc::lenient", "recovered after repair");
        return v;
    }

    if let Some(pairs) = parse_pairs(candidate) {
        tracing::trace!(target: "rcc::lenient", "recovered key/value pairs");
        return Value::Object(pairs);
    }

    tracing::debug!(target: "rcc::lenient", len = input.len(), "falling back to raw wrapper");
    raw(input)
}

/// Like [`parse_lenient`], but always returns an object.
///
/// Non-object results (arrays, scalars) are wrapped as `{"_raw": <original>}`.
pub fn parse_lenient_object(input: &str) -> Value {
    match parse_lenient(input) {
        v @ Value::Object(_) => v,
        _ => raw(input),
    }
}

fn raw(input: &str) -> Value {
    let mut map = Map::new();
    map.insert(RAW_KEY.to_string(), Value::String(input.to_string()));
    Value::Object(map)
}

fn strip_fence(text: &str) -> Option<&str> {
    FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Repair a JSON-ish region with `jsonrepair`.
///
/// Handles single quotes, bare keys, trailing or missing commas, comments and
/// Python literals. Only structured results (objects, arrays) are accepted.
fn repair_structured(region: &str) -> Option<Value> {
    let repaired = match repair_json(region, &Options::default()) {
        Ok(repaired) => repaired,
        Err(e) => {
            tracing::trace!(target: "rcc::lenient", error = %e, "json repair failed");
            return None;
        }
    };
    serde_json::from_str::<Value>(&repaired)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

/// `key=value` / `key: value` pairs delimited by newlines or commas.
///
/// A segment without a separator continues the previous value, so
/// `files=a.txt, b.txt` keeps its comma.
fn parse_pairs(text: &str) -> Option<Map<String, Value>> {
    let body = text
        .trim()
        .trim_start_matches(['{', '('])
        .trim_end_matches(['}', ')']);

    let mut entries: Vec<(String, String)> = Vec::new();
    for line in body.lines() {
        for (n, segment) in line.split(',').enumerate() {
            let delimiter = if n == 0 { "\n" } else { "," };
            match split_pair(segment) {
                Some((key, value)) => entries.push((key, value.to_string())),
                None => {
                    if let Some((_, prev)) = entries.last_mut() {
                        if !segment.trim().is_empty() {
                            prev.push_str(delimiter);
                            prev.push_str(segment);
                        }
                    } else if !segment.trim().is_empty() {
                        return None;
                    }
                }
            }
        }
    }

    if entries.is_empty() {
        return None;
    }

    let mut map = Map::new();
    for (key, value) in entries {
        map.insert(key, coerce_scalar(value.trim()));
    }
    Some(map)
}

fn split_pair(segment: &str) -> Option<(String, &str)> {
    let pos = segment.find(['=', ':'])?;
    let key = unquote(segment[..pos].trim());
    if !PAIR_KEY.is_match(key) {
        return None;
    }
    Some((key.to_string(), &segment[pos + 1..]))
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn coerce_scalar(raw: &str) -> Value {
    let s = unquote(raw);
    if s.len() != raw.len() {
        return Value::String(s.to_string());
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = s.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = s.parse::<f64>()
        && let Some(n) = serde_json::Number::from_f64(f)
    {
        return Value::Number(n);
    }
    Value::String(s.to_string())
}
