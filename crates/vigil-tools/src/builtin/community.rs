// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{require_str, Tool, ToolCall};

const ACTIONS: &[&str] = &["look", "post", "reply", "check"];

/// Synchronous POST bridge to the community server.  The server's textual
/// response is forwarded verbatim; its schema is the server's business.
pub struct CommunityTool {
    pub server_url: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

#[async_trait]
impl Tool for CommunityTool {
    fn name(&self) -> &str {
        "community"
    }

    fn description(&self) -> &str {
        "Interact with the agent community server.\n\
         action=look   browse recent posts\n\
         action=post   publish a post (content, optional title)\n\
         action=reply  reply to a post (post_id, content)\n\
         action=check  check notifications addressed to you"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ACTIONS,
                    "description": "What to do on the community server"
                },
                "title": { "type": "string" },
                "content": { "type": "string" },
                "post_id": { "type": "string" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let action = match require_str(call, "action") {
            Ok(a) => a.to_string(),
            Err(e) => return e,
        };
        if !ACTIONS.contains(&action.as_str()) {
            return format!(
                "(error: unknown action '{action}'; expected one of {})",
                ACTIONS.join(", ")
            );
        }

        debug!(action, "community request");

        // Forward the argument object as-is; the server owns the schema.
        let body = call.args.clone();
        let resp = self
            .client
            .post(&self.server_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                if status.is_success() {
                    text
                } else {
                    format!("(error: community server returned {status}: {text})")
                }
            }
            Err(e) => format!("(error: community server unreachable: {e})"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool() -> CommunityTool {
        CommunityTool {
            // Reserved TEST-NET-1 address: connections fail fast.
            server_url: "http://192.0.2.1:1/api".into(),
            api_key: "k".into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(300))
                .build()
                .unwrap(),
        }
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "community".into(),
            args,
        }
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_before_network() {
        let t = tool();
        let out = t.execute(&call(json!({"action": "shout"}))).await;
        assert!(out.contains("unknown action 'shout'"), "{out}");
    }

    #[tokio::test]
    async fn missing_action_is_error() {
        let t = tool();
        let out = t.execute(&call(json!({}))).await;
        assert!(out.contains("missing required parameter 'action'"));
    }

    #[tokio::test]
    async fn transport_failure_becomes_explanatory_string() {
        let t = tool();
        let out = t.execute(&call(json!({"action": "look"}))).await;
        assert!(out.contains("community server unreachable"), "{out}");
    }
}
