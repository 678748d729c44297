//! Shell argument packer
//!
//! Normalizes shell-like tool arguments (`{"command": "cd /tmp && ls"}`,
//! `{"cmd": ["ls"], "cwd": "/x"}`, ...) into [`ShellArgs`]: an argv vector plus
//! an optional working directory. The packer never adds a shell wrapper on
//! its own; see [`apply_wrap_policy`].

use serde_json::{Map, Value};

use crate::config::ShellWrapPolicy;
use crate::types::ShellArgs;

/// One word of a tokenized command line, with its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// An unquoted control operator (`> < | ;` or `&&`) appears in this word.
    /// `;` and `&&` always form a word of their own.
    pub control: bool,
}

/// Split a command line into words.
///
/// Single quotes are literal; inside double quotes a backslash escapes the next
/// character. Outside quotes a backslash escapes the next character as well.
/// Unquoted `;` and `&&` end the current word even without surrounding spaces.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<Token> = None;
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        if c.is_whitespace() {
            if let Some(mut tok) = current.take() {
                tok.end = pos;
                tokens.push(tok);
            }
            continue;
        }

        let separator_len = match c {
            ';' => 1,
            '&' if matches!(chars.peek(), Some((_, '&'))) => 2,
            _ => 0,
        };
        if separator_len > 0 {
            if let Some(mut tok) = current.take() {
                tok.end = pos;
                tokens.push(tok);
            }
            if separator_len == 2 {
                chars.next();
            }
            tokens.push(Token {
                text: input[pos..pos + separator_len].to_string(),
                start: pos,
                end: pos + separator_len,
                control: true,
            });
            continue;
        }

        let tok = current.get_or_insert_with(|| Token {
            text: String::new(),
            start: pos,
            end: pos,
            control: false,
        });

        match c {
            '\'' => {
                for (_, ch) in chars.by_ref() {
                    if ch == '\'' {
                        break;
                    }
                    tok.text.push(ch);
                }
            }
            '"' => {
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '"' => break,
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                tok.text.push(escaped);
                            }
                        }
                        other => tok.text.push(other),
                    }
                }
            }
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    tok.text.push(escaped);
                }
            }
            '>' | '<' | '|' => {
                tok.control = true;
                tok.text.push(c);
            }
            other => tok.text.push(other),
        }
    }

    if let Some(mut tok) = current.take() {
        tok.end = input.len();
        tokens.push(tok);
    }
    tokens
}

/// Words of a command line, without span information.
pub fn split_words(input: &str) -> Vec<String> {
    tokenize(input).into_iter().map(|t| t.text).collect()
}

/// Whether an unquoted control operator appears anywhere in the command line.
pub fn has_control_operators(input: &str) -> bool {
    tokenize(input).iter().any(|t| t.control)
}

/// Wrap a single command string in an explicit shell invocation when the
/// policy asks for it and the string needs one.
pub fn apply_wrap_policy(command: &str, policy: ShellWrapPolicy) -> Option<Vec<String>> {
    match policy {
        ShellWrapPolicy::Never => None,
        ShellWrapPolicy::ControlOperators => has_control_operators(command).then(|| {
            vec![
                "bash".to_string(),
                "-lc".to_string(),
                command.trim().to_string(),
            ]
        }),
    }
}

/// Pack shell-like arguments without any wrapping.
pub fn pack_shell_args(args: &Value) -> Option<ShellArgs> {
    pack_shell_args_with(args, ShellWrapPolicy::Never)
}

/// Pack shell-like arguments.
///
/// Accepts `command` (or `cmd`) as a string or an array, `workdir` (or `cwd`)
/// and `timeout_ms` (or `timeout`). Returns `None` when there is no usable
/// command.
pub fn pack_shell_args_with(args: &Value, policy: ShellWrapPolicy) -> Option<ShellArgs> {
    let obj = args.as_object()?;
    let command = obj.get("command").or_else(|| obj.get("cmd"))?;

    let mut workdir = obj
        .get("workdir")
        .or_else(|| obj.get("cwd"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let timeout_ms = obj
        .get("timeout_ms")
        .or_else(|| obj.get("timeout"))
        .and_then(Value::as_u64);

    let command = match command {
        Value::String(line) => {
            let tokens = tokenize(line);
            let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
            let (skip, dir) = leading_cd(&words);
            if workdir.is_none() {
                workdir = dir;
            }
            let rest = &tokens[skip.min(tokens.len())..];
            match rest.first() {
                None => Vec::new(),
                Some(first) => apply_wrap_policy(&line[first.start..], policy)
                    .unwrap_or_else(|| rest.iter().map(|t| t.text.clone()).collect()),
            }
        }
        Value::Array(items) => {
            let words: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            let refs: Vec<&str> = words.iter().map(String::as_str).collect();
            let (skip, dir) = leading_cd(&refs);
            if workdir.is_none() {
                workdir = dir;
            }
            words.into_iter().skip(skip).collect()
        }
        _ => return None,
    };

    let command = if command.is_empty() {
        vec!["pwd".to_string()]
    } else {
        command
    };

    Some(ShellArgs {
        command,
        workdir,
        timeout_ms,
    })
}

/// Pack shell arguments inside a tool-argument object, keeping unrelated keys.
///
/// The `cmd`/`cwd`/`timeout` aliases are replaced by their canonical names.
pub fn pack_shell_value(args: &Value, policy: ShellWrapPolicy) -> Option<Value> {
    let packed = pack_shell_args_with(args, policy)?;
    let mut out: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
    for alias in ["cmd", "cwd", "timeout", "workdir", "timeout_ms"] {
        out.remove(alias);
    }
    out.insert(
        "command".to_string(),
        Value::Array(packed.command.into_iter().map(Value::String).collect()),
    );
    if let Some(dir) = packed.workdir {
        out.insert("workdir".to_string(), Value::String(dir));
    }
    if let Some(ms) = packed.timeout_ms {
        out.insert("timeout_ms".to_string(), Value::from(ms));
    }
    Some(Value::Object(out))
}

/// Detect `cd <dir>` at the front. Returns how many words to drop and the dir.
fn leading_cd(words: &[&str]) -> (usize, Option<String>) {
    if words.len() < 2 || words[0] != "cd" {
        return (0, None);
    }
    let raw_dir = words[1];
    if let Some(dir) = raw_dir.strip_suffix(';') {
        return (2, Some(dir.to_string()));
    }
    let skip = match words.get(2) {
        Some(&"&&") | Some(&";") => 3,
        _ => 2,
    };
    (skip, Some(raw_dir.to_string()))
}
