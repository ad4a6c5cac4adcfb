// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The tool-calling loop: drives one streamed model conversation to
//! completion or budget exhaustion.
//!
//! Per iteration the stream is folded into an accumulator (content,
//! reasoning, tool-call fragments by index); text deltas are re-emitted to
//! the bus as fire-and-forget `thought_chunk` events while ordered events
//! frame the turn.  Tool calls execute sequentially — every event of call N
//! reaches subscribers before any event of call N+1.

use std::collections::BTreeMap;

use chrono::Local;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use vigil_channels::{Broadcaster, EventKind};
use vigil_model::{
    repair::repair_arguments, CompletionRequest, Message, ModelProvider, ResponseEvent,
    ToolCallRecord,
};
use vigil_tools::{ToolCall, ToolRegistry};

/// Extra calls tolerated past the budget before the loop is cut off.
const HARD_LIMIT_GRACE: u32 = 3;

/// What one activation round produced.
#[derive(Debug, Default)]
pub struct RoundResult {
    pub tools_used: u32,
    /// All assistant text of the round, reasoning and content alike, each
    /// turn prefixed with its local `[HH:MM:SS]` stamp.
    pub summary: String,
    /// Only the turns that triggered tool calls — the agent's working
    /// thoughts, without the closing summary.
    pub action_log: String,
    pub error: Option<String>,
}

/// Deterministic budget hint in four severity bands.  The hint rides inside
/// the tool result payload: it is a prompt-to-self for the model, not an
/// enforcement mechanism.
pub fn budget_hint(used: u32, normal_limit: u32) -> String {
    let remaining = normal_limit.saturating_sub(used);
    if used >= normal_limit {
        format!(
            "[tool budget {used}/{normal_limit}: exhausted — stop calling tools \
             and write your closing summary]"
        )
    } else if remaining == 1 {
        format!("[tool budget {used}/{normal_limit}: only one call left, wrap up now]")
    } else if remaining <= 3 {
        format!("[tool budget {used}/{normal_limit}: running low, start wrapping up]")
    } else {
        format!("[tool budget {used}/{normal_limit}]")
    }
}

/// Streaming accumulator for one model turn.
#[derive(Default)]
struct TurnAccumulator {
    content: String,
    reasoning: String,
    pending: BTreeMap<u32, PendingToolCall>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl TurnAccumulator {
    fn absorb(&mut self, event: ResponseEvent, bus: &Broadcaster) -> bool {
        match event {
            ResponseEvent::TextDelta(delta) => {
                bus.send_fast(EventKind::ThoughtChunk, json!({ "text": delta }));
                self.content.push_str(&delta);
            }
            ResponseEvent::ReasoningDelta(delta) => {
                bus.send_fast(
                    EventKind::ThoughtChunk,
                    json!({ "text": delta, "reasoning": true }),
                );
                self.reasoning.push_str(&delta);
            }
            ResponseEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let slot = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    slot.id = id;
                }
                if !name.is_empty() {
                    slot.name = name;
                }
                slot.args_buf.push_str(&arguments);
            }
            ResponseEvent::Done => return true,
            ResponseEvent::Error(e) => warn!("model stream warning: {e}"),
        }
        false
    }

    /// Flush accumulated tool calls in index order.  Calls with no name
    /// cannot be dispatched and are dropped; an empty id gets a synthetic
    /// one so the conversation history stays well-formed.
    fn tool_calls(&mut self) -> Vec<ToolCallRecord> {
        let mut calls = Vec::with_capacity(self.pending.len());
        for (i, (_, slot)) in std::mem::take(&mut self.pending).into_iter().enumerate() {
            if slot.name.is_empty() {
                warn!(tool_call_id = %slot.id, "dropping tool call with empty name");
                continue;
            }
            let id = if slot.id.is_empty() {
                warn!(tool_name = %slot.name, "tool call had empty id; generating one");
                format!("call_synthetic_{i}")
            } else {
                slot.id
            };
            calls.push(ToolCallRecord {
                id,
                name: slot.name,
                arguments: slot.args_buf,
            });
        }
        calls
    }
}

pub struct ToolLoop<'a> {
    pub model: &'a dyn ModelProvider,
    pub tools: &'a ToolRegistry,
    pub bus: &'a Broadcaster,
    pub normal_limit: u32,
    pub temperature: Option<f32>,
}

impl ToolLoop<'_> {
    /// Run the loop to completion.  Returns the round result and the final
    /// message sequence (for callers that want to inspect it).
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        cancel: &watch::Receiver<bool>,
    ) -> (RoundResult, Vec<Message>) {
        let mut result = RoundResult::default();
        let mut summary_blocks: Vec<String> = Vec::new();
        let mut action_blocks: Vec<String> = Vec::new();

        let schemas: Vec<vigil_model::ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| vigil_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        'round: loop {
            if *cancel.borrow() {
                debug!("round cancelled before model call");
                break;
            }

            self.bus
                .send_fast(EventKind::Loading, json!({ "message": "calling model" }));

            let req = CompletionRequest {
                messages: messages.clone(),
                tools: schemas.clone(),
                stream: true,
                temperature: self.temperature,
            };
            let mut stream = match self.model.complete(req).await {
                Ok(s) => s,
                Err(e) => {
                    result.error = Some(format!("model call failed: {e}"));
                    break;
                }
            };

            let mut turn = TurnAccumulator::default();
            let mut stream_error: Option<String> = None;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(ev) => {
                        if turn.absorb(ev, self.bus) {
                            break;
                        }
                    }
                    Err(e) => {
                        stream_error = Some(format!("model stream failed: {e}"));
                        break;
                    }
                }
            }

            self.bus.send(EventKind::ThoughtDone, json!({})).await;

            let stamp = Local::now().time();
            // A broken stream may leave half-assembled tool calls; recording
            // them would orphan call ids with no answering tool message.
            let tool_calls = if stream_error.is_some() {
                Vec::new()
            } else {
                turn.tool_calls()
            };

            let mut block_parts: Vec<&str> = Vec::new();
            if !turn.reasoning.is_empty() {
                block_parts.push(turn.reasoning.as_str());
            }
            if !turn.content.is_empty() {
                block_parts.push(turn.content.as_str());
            }
            if !block_parts.is_empty() {
                let stamped =
                    format!("[{}] {}", stamp.format("%H:%M:%S"), block_parts.join("\n"));
                summary_blocks.push(stamped.clone());
                if !tool_calls.is_empty() {
                    action_blocks.push(stamped);
                }
                self.bus
                    .send(
                        EventKind::Thought,
                        json!({
                            "content": turn.content,
                            "reasoning": turn.reasoning,
                        }),
                    )
                    .await;
            }

            let reasoning = (!turn.reasoning.is_empty()).then(|| turn.reasoning.clone());
            messages.push(Message::assistant_turn(
                turn.content.clone(),
                reasoning,
                tool_calls.clone(),
                stamp,
            ));

            if let Some(e) = stream_error {
                result.error = Some(e);
                break;
            }

            if tool_calls.is_empty() {
                break;
            }

            for tc in &tool_calls {
                result.tools_used += 1;
                let used = result.tools_used;
                let hint = budget_hint(used, self.normal_limit);

                let payload = if used > self.normal_limit || *cancel.borrow() {
                    // Past the budget (or stopping): the hint alone stands in
                    // for the result, keeping the call/result pairing intact.
                    hint
                } else {
                    let output = self.dispatch(tc).await;
                    format!("{hint}\n{output}")
                };

                messages.push(Message::tool_result(&tc.id, &payload));
                self.bus
                    .send(
                        EventKind::ToolResult,
                        json!({ "name": tc.name, "result": payload }),
                    )
                    .await;
            }

            if result.tools_used >= self.normal_limit + HARD_LIMIT_GRACE {
                warn!(
                    tools_used = result.tools_used,
                    "hard tool limit reached, ending round"
                );
                break 'round;
            }
        }

        result.summary = summary_blocks.join("\n");
        result.action_log = action_blocks.join("\n");
        (result, messages)
    }

    /// Execute one call: parse (repairing when needed), broadcast, run.
    async fn dispatch(&self, tc: &ToolCallRecord) -> String {
        let args = match serde_json::from_str::<serde_json::Value>(&tc.arguments) {
            Ok(v) if v.is_object() => Some(v),
            _ => repair_arguments(&tc.arguments, &tc.name),
        };
        let Some(args) = args else {
            warn!(tool = %tc.name, raw = %tc.arguments, "unrepairable tool arguments");
            return format!(
                "(error: could not parse tool call arguments: {})",
                tc.arguments
            );
        };

        self.bus.send_fast(
            EventKind::Loading,
            json!({ "message": format!("executing {}", tc.name) }),
        );
        self.bus
            .send(
                EventKind::ToolCall,
                json!({ "name": tc.name, "arguments": args }),
            )
            .await;

        let call = ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            args,
        };
        self.tools.execute(&call).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
