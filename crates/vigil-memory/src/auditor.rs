// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The end-of-round snapshot audit.
//!
//! A second, cheaper LLM reads the current snapshot plus the round's action
//! log and answers with a delta — never a full document.  The main model is
//! the fallback; when both fail the round's awareness update is lost, which
//! the pipeline treats as fatal (stale awareness is worse than stopping).

use std::sync::Arc;

use tracing::warn;

use vigil_model::{complete_text, CompletionRequest, Message, ModelProvider};

use crate::snapshot::{Snapshot, SnapshotDelta};

/// Audit calls run cold: the output is a structured patch, not prose.
const AUDIT_TEMPERATURE: f32 = 0.1;

const AUDITOR_SYSTEM: &str = "\
You are the inventory auditor for an autonomous agent's server. You maintain \
a YAML snapshot with sections: services (key: name), projects (key: path), \
tools (key: path), documents (key: path), environment (flat mapping), issues \
(key: summary, each with a status field).\n\
\n\
Given the current snapshot and what the agent did this round, respond with \
ONE YAML document describing only the changes:\n\
- `no_changes: true` when the inventory is unaffected\n\
- `add`: map of section -> list of new entries (full entries with key field)\n\
- `update`: map of section -> list of patches (key field plus changed \
fields); `environment` takes a flat mapping instead of a list\n\
- `remove`: map of section -> list of key values to delete\n\
- `activity`: ALWAYS present: `content` (one or two sentences, third person, \
what happened this round), `tags` (short list), optional `quote` — a short \
verbatim phrase taken ONLY from the agent's final output, never from its \
working thoughts\n\
\n\
Mark fixed issues with `status: resolved` in an update patch. Respond with \
YAML only.";

fn audit_prompt(snapshot_yaml: &str, action_log: &str, final_output: &str) -> String {
    format!(
        "Current snapshot:\n```yaml\n{snapshot_yaml}\n```\n\n\
         What the agent did this round (working thoughts):\n{action_log}\n\n\
         The agent's final output (quote source):\n{final_output}\n"
    )
}

pub struct SnapshotUpdater {
    /// Dedicated audit model; `None` means only the main model is available.
    auditor: Option<Arc<dyn ModelProvider>>,
    main: Arc<dyn ModelProvider>,
}

impl SnapshotUpdater {
    pub fn new(auditor: Option<Arc<dyn ModelProvider>>, main: Arc<dyn ModelProvider>) -> Self {
        Self { auditor, main }
    }

    /// Produce this round's delta.  Tries the audit model first, then the
    /// main model; `Err` carries both failures.
    pub async fn produce_delta(
        &self,
        snapshot: &Snapshot,
        action_log: &str,
        final_output: &str,
    ) -> Result<SnapshotDelta, String> {
        let snapshot_yaml =
            serde_yaml::to_string(snapshot).unwrap_or_else(|_| String::from("{}"));
        let prompt = audit_prompt(&snapshot_yaml, action_log, final_output);

        let mut failures: Vec<String> = Vec::new();
        let attempts: Vec<&Arc<dyn ModelProvider>> = self
            .auditor
            .iter()
            .chain(std::iter::once(&self.main))
            .collect();

        for provider in attempts {
            match self.attempt(provider.as_ref(), &prompt).await {
                Ok(delta) => return Ok(delta),
                Err(e) => {
                    warn!(
                        model = provider.model_name(),
                        error = %e,
                        "snapshot audit attempt failed"
                    );
                    failures.push(format!("{}: {e}", provider.model_name()));
                }
            }
        }
        Err(failures.join("; "))
    }

    async fn attempt(
        &self,
        provider: &dyn ModelProvider,
        prompt: &str,
    ) -> Result<SnapshotDelta, String> {
        let req = CompletionRequest {
            messages: vec![Message::system(AUDITOR_SYSTEM), Message::user(prompt)],
            tools: Vec::new(),
            stream: false,
            temperature: Some(AUDIT_TEMPERATURE),
        };
        let text = complete_text(provider, req)
            .await
            .map_err(|e| e.to_string())?;
        if text.trim().is_empty() {
            return Err("empty audit response".to_string());
        }
        SnapshotDelta::parse(&text).map_err(|e| format!("unparseable delta: {e}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
