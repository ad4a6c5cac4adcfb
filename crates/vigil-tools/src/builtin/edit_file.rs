// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use crate::builtin::read_file::{missing_file, resolve_user_path};
use crate::stealth::Stealth;
use crate::tool::{require_str, Tool, ToolCall};

pub struct EditFileTool {
    pub home: PathBuf,
    pub stealth: Arc<Stealth>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of old_str in a file with new_str.\n\
         old_str must match exactly one location — include enough surrounding\n\
         lines to make it unique. An empty new_str deletes the matched text.\n\
         Re-read the file after a previous edit before writing new context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file (or relative to your home)"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to find (must be unique in the file)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text; empty string deletes old_str"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let old_str = match require_str(call, "old_str") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let new_str = match require_str(call, "new_str") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let resolved = resolve_user_path(&self.home, &path);

        debug!(path = %path, "edit_file");

        if self.stealth.is_cloaked(&resolved) {
            return missing_file(&path);
        }
        if old_str.is_empty() {
            return "(error: old_str must not be empty)".to_string();
        }

        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => {
                return match e.kind() {
                    std::io::ErrorKind::NotFound => missing_file(&path),
                    _ => format!("(error: {e})"),
                }
            }
        };

        let occurrences = content.matches(&old_str).count();
        match occurrences {
            0 => not_found_error(&content, &old_str, &path),
            1 => {
                let lines_before = content.lines().count();
                let updated = content.replacen(&old_str, &new_str, 1);
                let lines_after = updated.lines().count();
                match tokio::fs::write(&resolved, &updated).await {
                    Ok(()) => format!(
                        "OK: edited {path} ({lines_before} lines -> {lines_after} lines)"
                    ),
                    Err(e) => format!("(error: {e})"),
                }
            }
            n => format!(
                "(error: old_str matches {n} locations in {path}; include more \
                 surrounding lines to make it unique)"
            ),
        }
    }
}

/// Build the zero-match error.  When a similar block exists, show it — the
/// usual cause is a stale context after a previous edit, and seeing the
/// current text lets the model fix its pattern without re-reading.
fn not_found_error(content: &str, old_str: &str, path: &str) -> String {
    let mut msg = format!("(error: old_str not found in {path})");
    if let Some((ratio, line_no, block)) = best_similar_block(content, old_str) {
        msg.push_str(&format!(
            "\nNearest match at line {line_no} ({:.0}% similar):\n{block}",
            ratio * 100.0
        ));
        msg.push_str("\nFix the text to match the file exactly and retry.");
    }
    msg
}

/// Similarity ratio in [0,1] using character-level diff (2×matches / total).
fn similarity_ratio(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f64 / total as f64
}

/// The line window of the file most similar to `old_str` (>30%), with its
/// 1-based starting line.
fn best_similar_block(content: &str, old_str: &str) -> Option<(f64, usize, String)> {
    let file_lines: Vec<&str> = content.lines().collect();
    let n = old_str.lines().count().max(1);
    if file_lines.len() < n {
        return None;
    }
    file_lines
        .windows(n)
        .enumerate()
        .map(|(i, win)| {
            let joined = win.join("\n");
            (similarity_ratio(old_str, &joined), i + 1, joined)
        })
        .filter(|(ratio, _, _)| *ratio > 0.3)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
