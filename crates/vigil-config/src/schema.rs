// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Community server integration.  Absent → the `community` tool is not
    /// registered at all.
    #[serde(default)]
    pub community: Option<CommunityConfig>,
}

/// Bind address of the management console.
///
/// The console itself (HTTP routes, WebSocket upgrade, auth) lives outside
/// this workspace; the port is still part of the core config because the
/// stealth layer must cloak references to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "WebConfig::default_host")]
    pub host: String,
    #[serde(default = "WebConfig::default_port")]
    pub port: u16,
}

impl WebConfig {
    fn default_host() -> String {
        "0.0.0.0".into()
    }
    fn default_port() -> u16 {
        8080
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The agent's home directory.  Relative tool paths resolve against this,
    /// never against the process working directory.
    #[serde(default = "AgentConfig::default_home")]
    pub home: String,
    /// Primary model as a `provider/model` reference, e.g.
    /// `deepseek/deepseek-chat`.  The provider prefix selects the API-key
    /// environment variable and the endpoint.
    #[serde(default = "AgentConfig::default_model")]
    pub model: String,
    /// Secondary model for the end-of-round snapshot audit.  Smaller and
    /// lower-temperature than the main model; when unset the main model is
    /// used for the audit as well.
    #[serde(default)]
    pub snapshot_model: Option<String>,
    /// Seconds to wait between activation rounds.
    #[serde(default = "AgentConfig::default_interval")]
    pub interval_secs: u64,
    /// Tool calls the agent may spend freely per round.  Past this the loop
    /// stops executing calls and answers with budget hints only; three hints
    /// past the limit the round is cut off.
    #[serde(default = "AgentConfig::default_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Timeout for a single shell command, in seconds.
    #[serde(default = "AgentConfig::default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Character cap for any single tool result returned to the model.
    #[serde(default = "AgentConfig::default_max_output")]
    pub max_output_chars: usize,
    /// Persona name, resolved by the persona provider (`prompts/<name>.md`).
    #[serde(default = "AgentConfig::default_persona")]
    pub persona: String,
    /// Sampling temperature for the main model.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// How many historical rounds are replayed as conversation context.
    #[serde(default = "AgentConfig::default_history_rounds")]
    pub history_rounds: usize,
    /// Data directory holding timeline/, snapshot.yaml, feed.jsonl, logs/.
    #[serde(default = "AgentConfig::default_data_dir")]
    pub data_dir: String,
    /// Directory of installed skills.  Absent → skill tools not registered.
    #[serde(default)]
    pub skills_dir: Option<String>,
    /// Directory of persona prompt files.
    #[serde(default)]
    pub prompts_dir: Option<String>,
}

impl AgentConfig {
    fn default_home() -> String {
        "/home/agent".into()
    }
    fn default_model() -> String {
        "deepseek/deepseek-chat".into()
    }
    fn default_interval() -> u64 {
        60
    }
    fn default_max_tool_calls() -> u32 {
        20
    }
    fn default_shell_timeout() -> u64 {
        30
    }
    fn default_max_output() -> usize {
        4000
    }
    fn default_persona() -> String {
        "default".into()
    }
    fn default_history_rounds() -> usize {
        3
    }
    fn default_data_dir() -> String {
        "data".into()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            home: Self::default_home(),
            model: Self::default_model(),
            snapshot_model: None,
            interval_secs: Self::default_interval(),
            max_tool_calls: Self::default_max_tool_calls(),
            shell_timeout_secs: Self::default_shell_timeout(),
            max_output_chars: Self::default_max_output(),
            persona: Self::default_persona(),
            temperature: None,
            history_rounds: Self::default_history_rounds(),
            data_dir: Self::default_data_dir(),
            skills_dir: None,
            prompts_dir: None,
        }
    }
}

/// Per-tool enable flags.  The shell and file tools are the agent's hands
/// and stay on unless explicitly disabled; skill and community tools also
/// require their backing config (skills_dir / community section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub shell: bool,
    #[serde(default = "default_true")]
    pub files: bool,
    #[serde(default = "default_true")]
    pub edit: bool,
    #[serde(default = "default_true")]
    pub skills: bool,
    #[serde(default = "default_true")]
    pub community: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell: true,
            files: true,
            edit: true,
            skills: true,
            community: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub server_url: String,
    /// Bearer token sent on every request.
    pub api_key: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
