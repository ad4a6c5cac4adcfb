// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Serialize;

/// Lifecycle phase of the activation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// Not started; waiting for the operator.
    Idle,
    /// A round is in progress.
    Running,
    /// Between rounds, sleeping out the interval.
    Waiting,
    /// Stop requested; the current round finishes first.
    Stopping,
    /// Fatal failure (snapshot update lost); operator restart required.
    Error,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Waiting => "waiting",
            RunPhase::Stopping => "stopping",
            RunPhase::Error => "error",
        }
    }
}

/// Process-wide run state.  Mutated only by the scheduler's worker; read by
/// the status endpoint and the broadcast bus.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub state: RunPhase,
    pub current_round: u64,
    pub total_rounds: u64,
    pub last_round_tools: u32,
    pub last_round_summary: String,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            state: RunPhase::Idle,
            current_round: 0,
            total_rounds: 0,
            last_round_tools: 0,
            last_round_summary: String::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
