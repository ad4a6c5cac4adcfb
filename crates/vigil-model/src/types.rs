// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// A tool invocation recorded on an assistant message.
///
/// `arguments` is the raw JSON text exactly as accumulated from the stream;
/// parsing (and, when needed, repair) happens at dispatch time so a broken
/// argument string can still be stored and replayed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Opaque identifier assigned by the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the round's conversation.
///
/// The sequence is rebuilt from scratch every round.  Role-specific fields:
/// assistant messages may carry `reasoning`, `tool_calls` and a local
/// `stamped_at` time; tool messages carry the `tool_call_id` they answer.
/// Invariant: every entry in an assistant's `tool_calls` has exactly one
/// later tool message with the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Local wall-clock time when the assistant message was finalised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamped_at: Option<NaiveTime>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            stamped_at: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            stamped_at: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            stamped_at: None,
        }
    }

    /// A finalised assistant turn as produced by the streaming fold.
    pub fn assistant_turn(
        content: impl Into<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
        stamped_at: NaiveTime,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning: reasoning.filter(|r| !r.is_empty()),
            tool_calls,
            tool_call_id: None,
            stamped_at: Some(stamped_at),
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: Some(id.into()),
            stamped_at: None,
        }
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
    pub temperature: Option<f32>,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model.
    TextDelta(String),
    /// A chain-of-thought delta (`reasoning_content` / `reasoning`).
    ReasoningDelta(String),
    /// A fragment of a tool call.  Providers interleave chunks for parallel
    /// tool calls by `index`; `id` and `name` arrive once, `arguments`
    /// accumulates across deltas.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// The stream finished normally.
    Done,
    /// A recoverable error (non-fatal warning).
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hello");
        assert!(m.tool_calls.is_empty());
    }

    #[test]
    fn message_tool_result_carries_call_id() {
        let m = Message::tool_result("call-7", "output");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-7"));
        assert_eq!(m.content, "output");
    }

    #[test]
    fn assistant_turn_drops_empty_reasoning() {
        let t = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let m = Message::assistant_turn("answer", Some(String::new()), vec![], t);
        assert!(m.reasoning.is_none());
        assert_eq!(m.stamped_at, Some(t));
    }

    #[test]
    fn assistant_turn_keeps_tool_calls_in_order() {
        let t = NaiveTime::from_hms_opt(1, 2, 3).unwrap();
        let calls = vec![
            ToolCallRecord { id: "a".into(), name: "shell_execute".into(), arguments: "{}".into() },
            ToolCallRecord { id: "b".into(), name: "read_file".into(), arguments: "{}".into() },
        ];
        let m = Message::assistant_turn("", None, calls.clone(), t);
        assert_eq!(m.tool_calls, calls);
    }

    #[test]
    fn message_serialises_without_empty_optionals() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("reasoning"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn message_round_trips_through_json() {
        let t = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let m = Message::assistant_turn(
            "done",
            Some("thought about it".into()),
            vec![ToolCallRecord { id: "c1".into(), name: "shell_execute".into(), arguments: "{\"command\":\"ls\"}".into() }],
            t,
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.reasoning.as_deref(), Some("thought about it"));
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.stamped_at, Some(t));
    }
}
