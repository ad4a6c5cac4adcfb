// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Trait that every tool must implement.
///
/// Execution always yields a single text string.  Failures are part of that
/// string — the agent must see them in-band and react; nothing a tool does
/// raises an error past the executor.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, call: &ToolCall) -> String;
}

/// Fetch a required string argument, or produce the in-band error the agent
/// sees.
pub(crate) fn require_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, String> {
    call.args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        let preview = serde_json::to_string(&call.args).unwrap_or_else(|_| "null".to_string());
        format!("(error: missing required parameter '{key}'; received: {preview})")
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_returns_value() {
        let call = ToolCall {
            id: "1".into(),
            name: "t".into(),
            args: json!({"path": "/tmp/x"}),
        };
        assert_eq!(require_str(&call, "path").unwrap(), "/tmp/x");
    }

    #[test]
    fn require_str_error_names_parameter_and_shows_args() {
        let call = ToolCall {
            id: "1".into(),
            name: "t".into(),
            args: json!({"wrong": 1}),
        };
        let err = require_str(&call, "path").unwrap_err();
        assert!(err.contains("'path'"));
        assert!(err.contains("wrong"));
    }

    #[test]
    fn require_str_rejects_non_string() {
        let call = ToolCall {
            id: "1".into(),
            name: "t".into(),
            args: json!({"path": 42}),
        };
        assert!(require_str(&call, "path").is_err());
    }
}
