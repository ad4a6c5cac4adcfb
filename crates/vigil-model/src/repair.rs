// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Recovery of malformed tool-call argument JSON.
//!
//! Models occasionally emit argument strings that are not valid JSON:
//! invalid escape sequences (`\c`, `\(`), strings cut off mid-value when the
//! output token limit hits, or fragments missing the outer braces entirely.
//! Rather than wasting the call, three repair stages run in order:
//!
//! 1. Replace invalid `\X` escapes (X outside `"\/bfnrtu`) with plain `X`.
//! 2. Close unterminated strings and brackets by scan state, appending the
//!    missing `"` / `]` / `}` in dependency order.
//! 3. Extract known fields by regex as a last resort: `path` + `content`
//!    (+ `append`) for the file tools, `command` for shell, `content` alone
//!    otherwise.
//!
//! Any success returns the parsed object; `None` means all stages failed and
//! the caller should answer the model with a synthetic parse-error result.

use regex::Regex;
use serde_json::{json, Value};

/// Attempt to recover a JSON object from a malformed argument string.
pub fn repair_arguments(raw: &str, tool_name: &str) -> Option<Value> {
    // Stage 1: invalid escape sequences.
    let fixed = fix_invalid_escapes(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&fixed) {
        if v.is_object() {
            return Some(v);
        }
    }

    // Stage 2: balance unclosed quotes and brackets.
    let balanced = balance_delimiters(&fixed);
    if let Ok(v) = serde_json::from_str::<Value>(&balanced) {
        if v.is_object() {
            return Some(v);
        }
    }

    // Stage 3: field extraction.
    extract_known_fields(raw, tool_name)
}

/// Walk through a JSON string and replace any invalid escape sequence inside
/// string values with the escaped character itself.
///
/// Valid JSON escapes are `"`, `\`, `/`, `b`, `f`, `n`, `r`, `t`, `u`; for
/// anything else the backslash is dropped so `\c` becomes `c`.
fn fix_invalid_escapes(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => result.push(next),
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

/// Close whatever the scan leaves open, innermost first: a dangling string
/// gets its quote, then brackets pop off the open stack in reverse order.
fn balance_delimiters(raw: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = raw.trim_end().to_string();
    if result.ends_with('\\') {
        // A trailing lone backslash would escape the closing quote.
        result.pop();
    }
    if in_string {
        result.push('"');
    }
    while let Some(close) = stack.pop() {
        result.push(close);
    }
    result
}

/// Pull a named string field out of the wreckage.  Tolerates a missing
/// closing quote (value truncated at end of input).
fn extract_string_field(raw: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{field}"\s*:\s*"((?:\\.|[^"\\])*)"#);
    let re = Regex::new(&pattern).ok()?;
    let cap = re.captures(raw)?.get(1)?.as_str().to_string();
    // Unescape by round-tripping through the JSON parser; a truncated escape
    // at the very end is dropped first.
    let cleaned = cleaned_escape_tail(&cap);
    serde_json::from_str::<String>(&format!("\"{cleaned}\"")).ok()
}

fn cleaned_escape_tail(s: &str) -> String {
    let backslashes = s.chars().rev().take_while(|&c| c == '\\').count();
    if backslashes % 2 == 1 {
        s[..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn extract_bool_field(raw: &str, field: &str) -> Option<bool> {
    let pattern = format!(r#""{field}"\s*:\s*(true|false)"#);
    let re = Regex::new(&pattern).ok()?;
    Some(re.captures(raw)?.get(1)?.as_str() == "true")
}

/// Stage 3: rebuild an argument object from whichever fields the tool is
/// known to need.
fn extract_known_fields(raw: &str, tool_name: &str) -> Option<Value> {
    match tool_name {
        "read_file" | "write_file" | "edit_file" => {
            let path = extract_string_field(raw, "path")?;
            let mut obj = json!({ "path": path });
            if let Some(content) = extract_string_field(raw, "content") {
                obj["content"] = json!(content);
            }
            if let Some(append) = extract_bool_field(raw, "append") {
                obj["append"] = json!(append);
            }
            Some(obj)
        }
        "shell_execute" => {
            let command = extract_string_field(raw, "command")?;
            Some(json!({ "command": command }))
        }
        _ => {
            let content = extract_string_field(raw, "content")?;
            Some(json!({ "content": content }))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Stage 1: invalid escapes ──────────────────────────────────────────────

    #[test]
    fn invalid_escape_is_dropped() {
        let v = repair_arguments(r#"{"path": "C:\code\new"}"#, "read_file").unwrap();
        assert_eq!(v["path"], "C:code\new");
    }

    #[test]
    fn valid_escapes_survive() {
        let v = repair_arguments(r#"{"content": "line1\nline2"}"#, "write_file");
        // Already-valid input parses on stage 1 unchanged.
        assert_eq!(v.unwrap()["content"], "line1\nline2");
    }

    // ── Stage 2: balancing ────────────────────────────────────────────────────

    #[test]
    fn truncated_string_and_object_are_closed() {
        let v = repair_arguments(r#"{"path": "/a", "content": "hello"#, "write_file").unwrap();
        assert_eq!(v, serde_json::json!({"path": "/a", "content": "hello"}));
    }

    #[test]
    fn unclosed_array_is_closed() {
        let v = repair_arguments(r#"{"tags": ["a", "b""#, "other").unwrap();
        assert_eq!(v["tags"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn nested_brackets_close_in_dependency_order() {
        let v = repair_arguments(r#"{"a": {"b": [1, 2"#, "other").unwrap();
        assert_eq!(v["a"]["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn trailing_backslash_does_not_eat_closing_quote() {
        let v = repair_arguments(r#"{"command": "echo \"#, "shell_execute").unwrap();
        assert_eq!(v["command"], "echo ");
    }

    // ── Stage 3: field extraction ─────────────────────────────────────────────

    #[test]
    fn shell_command_extracted_from_fragment() {
        let v = repair_arguments(r#"{"command": "ls -la /tmp" some trailing junk"#, "shell_execute")
            .unwrap();
        assert_eq!(v["command"], "ls -la /tmp");
    }

    #[test]
    fn file_fields_extracted_from_fragment() {
        let raw = r#"garbage "path": "/etc/motd", "content": "hi", "append": true garbage"#;
        let v = repair_arguments(raw, "write_file").unwrap();
        assert_eq!(v["path"], "/etc/motd");
        assert_eq!(v["content"], "hi");
        assert_eq!(v["append"], true);
    }

    #[test]
    fn extraction_unescapes_values() {
        let v = repair_arguments(r#"x "content": "a\nb" x"#, "other").unwrap();
        assert_eq!(v["content"], "a\nb");
    }

    #[test]
    fn hopeless_input_returns_none() {
        assert!(repair_arguments("complete nonsense", "shell_execute").is_none());
        assert!(repair_arguments("", "read_file").is_none());
    }

    #[test]
    fn non_object_result_is_rejected() {
        // A bare string is valid JSON but not an argument object.
        assert!(repair_arguments(r#""just a string""#, "other").is_none());
    }
}
