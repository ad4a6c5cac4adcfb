// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted provider for tests.
//!
//! Each call to [`ModelProvider::complete`] pops the next scripted turn and
//! streams its events.  When the script is exhausted, an empty `Done`-only
//! stream is returned so loops terminate instead of hanging.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{provider::ResponseStream, CompletionRequest, ModelProvider, ResponseEvent};

pub struct MockProvider {
    turns: Mutex<VecDeque<Vec<ResponseEvent>>>,
    /// Requests seen, for assertions on what the loop sent.
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(turns: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A turn that streams text and finishes.
    pub fn text_turn(text: &str) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(text.to_string()),
            ResponseEvent::Done,
        ]
    }

    /// A turn that requests a single tool call (arguments arrive split in
    /// two deltas, as real providers do).
    pub fn tool_turn(id: &str, name: &str, arguments: &str) -> Vec<ResponseEvent> {
        let mid = arguments.len() / 2;
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments[..mid].to_string(),
            },
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: String::new(),
                name: String::new(),
                arguments: arguments[mid..].to_string(),
            },
            ResponseEvent::Done,
        ]
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ResponseEvent::Done]);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
