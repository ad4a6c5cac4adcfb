// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared driver for OpenAI-compatible chat completion APIs.
//!
//! Every hosted provider the runtime routes to (DeepSeek, OpenAI, Anthropic,
//! Google, OpenRouter) exposes the same `/chat/completions` SSE wire format,
//! so a single configurable driver covers all of them.  The registry supplies
//! the base URL and pre-resolved API key per provider prefix.
//!
//! Reasoning models stream their chain of thought as `reasoning_content`
//! (DeepSeek-R1, Qwen3) or `reasoning` (OpenRouter); both are surfaced as
//! [`ResponseEvent::ReasoningDelta`].

use anyhow::{bail, Context};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::ResponseStream, CompletionRequest, Message, ResponseEvent, Role,
};

pub struct OpenAICompatProvider {
    /// Provider id returned by `ModelProvider::name()`.
    driver_name: &'static str,
    /// Model id forwarded to the API.
    model: String,
    /// API key (pre-resolved from the environment by the registry).
    api_key: String,
    /// Full chat completions URL.
    chat_url: String,
    client: reqwest::Client,
}

impl OpenAICompatProvider {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.deepseek.com/v1`.
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: String,
        base_url: &str,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl crate::ModelProvider for OpenAICompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            driver = %self.driver_name,
            model = %self.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let resp = self
            .client
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.driver_name))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("{} error {status}: {text}", self.driver_name);
        }

        if !req.stream {
            // Non-streaming call: parse the full body and synthesise the
            // equivalent event sequence so callers fold one code path.
            let body: Value = resp.json().await.context("parsing completion body")?;
            let events = parse_full_body(&body);
            return Ok(Box::pin(futures::stream::iter(events)));
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across TCP packets.  Maintain a line buffer
        // across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v).map(Ok)
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

fn parse_sse_chunk(v: &Value) -> Option<ResponseEvent> {
    let delta = &v["choices"][0]["delta"];

    // Tool call delta — providers may send parallel tool calls identified by
    // an "index" field; each SSE chunk carries one delta in practice.
    if let Some(tc) = delta.get("tool_calls").and_then(|a| a.get(0)) {
        return Some(ResponseEvent::ToolCallDelta {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        });
    }

    // Reasoning delta — `reasoning_content` (DeepSeek, llama.cpp, Qwen3) or
    // `reasoning` (OpenRouter).  Same semantics, different field name.
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(thinking) = thinking {
        if !thinking.is_empty() {
            return Some(ResponseEvent::ReasoningDelta(thinking.to_string()));
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(ResponseEvent::TextDelta(text.to_string()));
        }
    }

    None
}

/// Map a non-streaming completion body to the streamed event sequence.
fn parse_full_body(v: &Value) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    let message = &v["choices"][0]["message"];
    if let Some(r) = message.get("reasoning_content").and_then(|c| c.as_str()) {
        if !r.is_empty() {
            events.push(Ok(ResponseEvent::ReasoningDelta(r.to_string())));
        }
    }
    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(Ok(ResponseEvent::TextDelta(text.to_string())));
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(|a| a.as_array()) {
        for (i, tc) in calls.iter().enumerate() {
            events.push(Ok(ResponseEvent::ToolCallDelta {
                index: i as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            }));
        }
    }
    events.push(Ok(ResponseEvent::Done));
    events
}

/// Convert the round's message sequence into the OpenAI wire-format array.
///
/// Extracted as a free function so it can be unit-tested without HTTP.
/// Assistant `reasoning` is forwarded as `reasoning_content` so reasoning
/// models keep their thinking chain across turns.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => json!({ "role": "system", "content": m.content }),
            Role::User => json!({ "role": "user", "content": m.content }),
            Role::Assistant => {
                let mut obj = json!({ "role": "assistant", "content": m.content });
                if let Some(r) = &m.reasoning {
                    obj["reasoning_content"] = json!(r);
                }
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                obj
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content,
            }),
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
