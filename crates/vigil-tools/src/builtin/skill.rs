// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::skills::SkillProvider;
use crate::tool::{require_str, Tool, ToolCall};

/// Read one file inside an installed skill.
pub struct SkillReadTool {
    pub provider: Arc<dyn SkillProvider>,
}

#[async_trait]
impl Tool for SkillReadTool {
    fn name(&self) -> &str {
        "skill_read"
    }

    fn description(&self) -> &str {
        "Read a file from an installed skill. With only the skill name, the\n\
         skill's own instructions (skill.md) are returned together with a\n\
         listing of bundled files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill": {
                    "type": "string",
                    "description": "Name of the installed skill"
                },
                "path": {
                    "type": "string",
                    "description": "File path inside the skill (default: skill.md)"
                }
            },
            "required": ["skill"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let skill = match require_str(call, "skill") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        match self.provider.read_file(&skill, path) {
            Ok(text) => text,
            Err(e) => e,
        }
    }
}

/// Execute a script bundled inside an installed skill.
pub struct SkillExecTool {
    pub provider: Arc<dyn SkillProvider>,
}

#[async_trait]
impl Tool for SkillExecTool {
    fn name(&self) -> &str {
        "skill_exec"
    }

    fn description(&self) -> &str {
        "Run a script from an installed skill's scripts/ directory with\n\
         optional arguments, returning its combined output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill": {
                    "type": "string",
                    "description": "Name of the installed skill"
                },
                "script": {
                    "type": "string",
                    "description": "Script filename inside the skill's scripts/ directory"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments passed to the script"
                }
            },
            "required": ["skill", "script"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let skill = match require_str(call, "skill") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let script = match require_str(call, "script") {
            Ok(s) => s.to_string(),
            Err(e) => return e,
        };
        let args: Vec<String> = call
            .args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        match self.provider.exec_script(&skill, &script, &args).await {
            Ok(text) => text,
            Err(e) => e,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
