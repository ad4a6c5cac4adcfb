// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod agent;
pub mod auth;
pub mod context;
pub mod persona;
pub mod scheduler;
pub mod state;

pub use agent::{budget_hint, RoundResult, ToolLoop};
pub use auth::AuthStore;
pub use context::{assemble_messages, ensure_wakeup_note, final_output_of, ContextInputs};
pub use persona::{FsPersonaProvider, PersonaProvider};
pub use scheduler::{Scheduler, SchedulerDeps, SchedulerError};
pub use state::{RunPhase, RunState};
