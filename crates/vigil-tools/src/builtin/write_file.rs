// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::read_file::resolve_user_path;
use crate::stealth::Stealth;
use crate::tool::{require_str, Tool, ToolCall};

/// The string a real permission failure produces.  The cloaked branch uses
/// the identical bytes so a hidden location reads as an ordinary protected
/// one.
pub(crate) fn permission_denied(path: &str) -> String {
    format!("(error: permission denied: {path})")
}

pub struct WriteFileTool {
    pub home: PathBuf,
    pub stealth: Arc<Stealth>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories automatically.\n\
         Relative paths resolve against your home directory. Set append=true\n\
         to add to the end of an existing file instead of overwriting."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file (or relative to your home)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "If true, append instead of overwrite. Default: false"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let path = match require_str(call, "path") {
            Ok(p) => p.to_string(),
            Err(e) => return e,
        };
        let content = match require_str(call, "content") {
            Ok(c) => c.to_string(),
            Err(e) => return e,
        };
        let append = call
            .args
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let resolved = resolve_user_path(&self.home, &path);

        debug!(path = %path, append, "write_file");

        if self.stealth.is_cloaked(&resolved) {
            return permission_denied(&path);
        }

        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return match e.kind() {
                        std::io::ErrorKind::PermissionDenied => permission_denied(&path),
                        _ => format!("(error: {e})"),
                    };
                }
            }
        }

        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&resolved)
                .await
            {
                Ok(mut f) => {
                    let write = f.write_all(content.as_bytes()).await;
                    // tokio file close is async on drop; flush + shutdown so
                    // every byte reaches the OS before we report success.
                    let _ = f.flush().await;
                    let _ = f.shutdown().await;
                    write
                }
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&resolved, &content).await
        };

        match result {
            Ok(()) => {
                let verb = if append { "appended" } else { "wrote" };
                format!("OK: {verb} {} bytes to {path}", content.len())
            }
            Err(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => permission_denied(&path),
                _ => format!("(error: {e})"),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
