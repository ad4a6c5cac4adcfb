// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::stealth::Stealth;
use crate::tool::{require_str, Tool, ToolCall};
use crate::truncate_output;

/// The string a genuinely missing file produces.  The cloaked branch returns
/// the identical bytes; nothing distinguishes a hidden file from an absent
/// one.
pub(crate) fn missing_file(path: &str) -> String {
    format!("(error: file not found: {path})")
}

pub struct ReadFileTool {
    pub home: PathBuf,
    pub max_output: usize,
    pub stealth: Arc<Stealth>,
}

/// Relative paths resolve against the agent's home, never the process CWD —
/// "./" from the agent's point of view must not reach the runtime directory.
pub(crate) fn resolve_user_path(home: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        home.join(p)
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file on the server.\n\
         Relative paths resolve against your home directory. Long files are\n\
         truncated; use shell tools to slice out specific sections."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file (or relative to your home)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let resolved = resolve_user_path(&self.home, &path);

        debug!(path = %path, "read_file");

        if self.stealth.is_cloaked(&resolved) {
            return missing_file(&path);
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) if content.is_empty() => "(file is empty)".to_string(),
            Ok(content) => truncate_output(&content, self.max_output),
            Err(e) => match e.kind() {
                std::io::ErrorKind::NotFound => missing_file(&path),
                _ if resolved.is_dir() => {
                    format!("(error: '{path}' is a directory, not a file)")
                }
                _ => format!("(error: {e})"),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
