// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod mock;
mod openai_compat;
mod provider;
pub mod registry;
pub mod repair;
mod types;

pub use provider::{ModelProvider, ResponseStream};
pub use registry::from_model_ref;
pub use types::{
    CompletionRequest, Message, ResponseEvent, Role, ToolCallRecord, ToolSchema,
};

use futures::StreamExt;

/// Drive a completion to the end and return the concatenated text content.
///
/// Reasoning deltas and tool-call deltas are discarded; the first stream
/// error aborts.  Used for single-shot calls (the snapshot audit) where the
/// caller has no interest in streaming.
pub async fn complete_text(
    provider: &dyn ModelProvider,
    req: CompletionRequest,
) -> anyhow::Result<String> {
    let mut stream = provider.complete(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) => text.push_str(&delta),
            ResponseEvent::Done => break,
            _ => {}
        }
    }
    Ok(text)
}
