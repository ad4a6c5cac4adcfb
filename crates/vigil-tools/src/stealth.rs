// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Makes the runtime invisible to the agent.
//!
//! A `[BLOCKED]` reply invites probing; a natural-looking "file not found"
//! does not.  So instead of refusing access to the runtime's own footprint,
//! every trace of it is filtered out of what the agent sees:
//!
//! 1. **Path cloaking** — any path whose real location is inside the project
//!    root reads as absent and writes as permission-denied, with strings
//!    byte-identical to the genuine OS errors.
//! 2. **Output filtering** — shell output lines that mention a stealth
//!    keyword, or that resolve into the project root when joined with a path
//!    from the command, are silently dropped.
//! 3. **Environment scrubbing** — subprocesses never see the runtime's own
//!    variables or host session markers.  API keys are preserved; the agent
//!    may legitimately need them.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use regex::Regex;

/// Host session context detected at startup.  Every part is optional; absent
/// parts contribute no keywords.
#[derive(Debug, Clone, Default)]
pub struct HostSession {
    pub tmux_session: Option<String>,
    pub screen_session: Option<String>,
    pub systemd_service: Option<String>,
}

impl HostSession {
    /// Detect the hosting session from the process environment.
    ///
    /// - `STY` is `<pid>.<session>` under GNU screen.
    /// - `TMUX` is `<socket>,<pid>,<session-index>` under tmux.
    /// - The systemd unit name comes from `/proc/self/cgroup` when the
    ///   process was started by a service (also signalled by
    ///   `INVOCATION_ID`).
    pub fn detect() -> Self {
        let screen_session = std::env::var("STY")
            .ok()
            .and_then(|sty| sty.split_once('.').map(|(_, name)| name.to_string()))
            .filter(|s| !s.is_empty());

        let tmux_session = std::env::var("TMUX")
            .ok()
            .and_then(|t| t.rsplit(',').next().map(str::to_string))
            .filter(|s| !s.is_empty());

        let systemd_service = std::fs::read_to_string("/proc/self/cgroup")
            .ok()
            .and_then(|cgroup| {
                cgroup.lines().find_map(|line| {
                    line.rsplit('/').next().and_then(|unit| {
                        unit.strip_suffix(".service").map(str::to_string)
                    })
                })
            })
            .filter(|s| !s.is_empty());

        Self {
            tmux_session,
            screen_session,
            systemd_service,
        }
    }
}

/// One round's stealth context.  Built fresh per round so keywords track the
/// current configuration.
pub struct Stealth {
    resolved_root: PathBuf,
    keywords: Vec<String>,
    port_reference: Option<Regex>,
}

impl Stealth {
    pub fn new(
        project_dir: &Path,
        pid: u32,
        host: &HostSession,
        server_port: Option<u16>,
    ) -> Self {
        let resolved_root = resolve_real(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());

        let mut keywords: Vec<String> = Vec::new();
        keywords.push(project_dir.to_string_lossy().into_owned());
        keywords.push(resolved_root.to_string_lossy().into_owned());
        keywords.push(format!(" {pid} "));
        if let Some(port) = server_port {
            keywords.push(format!(":{port}"));
            // /proc/net/tcp lists ports as 4-digit uppercase hex.
            keywords.push(format!("{port:04X}"));
        }
        if let Some(s) = &host.tmux_session {
            keywords.push(format!("tmux: {s}"));
            keywords.push(format!("{s}:"));
        }
        if let Some(s) = &host.screen_session {
            keywords.push(format!("screen: {s}"));
            keywords.push(format!(".{s}"));
        }
        if let Some(s) = &host.systemd_service {
            keywords.push(format!("{s}.service"));
        }

        let mut seen = HashSet::new();
        keywords.retain(|k| !k.trim().is_empty() && seen.insert(k.clone()));

        let port_reference = server_port.and_then(|port| {
            Regex::new(&format!(
                r"(localhost|127\.0\.0\.1|0\.0\.0\.0):{port}\b"
            ))
            .ok()
        });

        Self {
            resolved_root,
            keywords,
            port_reference,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// True when `path` really lives inside the project root.  Operates on
    /// resolved paths only; a path that cannot be resolved at all is treated
    /// as cloaked (fail-safe).
    pub fn is_cloaked(&self, path: &Path) -> bool {
        match resolve_real(path) {
            Ok(real) => {
                real == self.resolved_root || real.starts_with(&self.resolved_root)
            }
            Err(_) => true,
        }
    }

    /// Pre-execution check of a shell command.  Returns a synthetic error
    /// string when the command references the project root or the management
    /// port; `None` means the command may run.
    pub fn precheck_command(&self, command: &str) -> Option<String> {
        for token in absolute_path_tokens(command) {
            if self.is_cloaked(Path::new(&token)) {
                return Some(format!("bash: {token}: No such file or directory"));
            }
        }
        if let Some(re) = &self.port_reference {
            if let Some(m) = re.find(command) {
                return Some(format!("connect to {} failed: Connection refused", m.as_str()));
            }
        }
        None
    }

    /// Post-execution output filter.
    ///
    /// A line is dropped when joining it (or its last whitespace token)
    /// against any absolute path from the command resolves into the project
    /// root, or when it contains any stealth keyword.  Line tokens that are
    /// themselves absolute are left to the keyword filter.
    pub fn filter_output(&self, command: &str, output: &str) -> String {
        let command_paths = absolute_path_tokens(command);
        let kept: Vec<&str> = output
            .lines()
            .filter(|line| !self.line_reveals_root(&command_paths, line))
            .filter(|line| !self.keywords.iter().any(|k| line.contains(k.as_str())))
            .collect();
        kept.join("\n")
    }

    fn line_reveals_root(&self, command_paths: &[String], line: &str) -> bool {
        let stripped = line.trim();
        if stripped.is_empty() {
            return false;
        }
        for base in command_paths {
            let base = Path::new(base);
            if let Some(last) = stripped.split_whitespace().last() {
                if !last.starts_with('/') && self.is_joined_cloaked(base, last) {
                    return true;
                }
            }
            if !stripped.starts_with('/') && self.is_joined_cloaked(base, stripped) {
                return true;
            }
        }
        false
    }

    fn is_joined_cloaked(&self, base: &Path, tail: &str) -> bool {
        let joined = base.join(tail);
        match resolve_real(&joined) {
            Ok(real) => real == self.resolved_root || real.starts_with(&self.resolved_root),
            // Joining arbitrary output text produces mostly nonexistent
            // paths; those reveal nothing and must not eat the line.
            Err(_) => false,
        }
    }

    /// Environment visible to agent subprocesses: the runtime's own
    /// variables and host session markers removed, API keys and everything
    /// else passed through.
    pub fn sanitized_env(&self) -> Vec<(String, String)> {
        sanitized_environment()
    }
}

/// The scrubbed process environment (see [`Stealth::sanitized_env`]).
/// Free function so subprocess holders (skill scripts) can be built before
/// any round's stealth context exists.
pub fn sanitized_environment() -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(name, _)| !is_scrubbed_var(name))
        .collect()
}

fn is_scrubbed_var(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper.starts_with("VIGIL_")
        || upper == "INVOCATION_ID"
        || upper == "TMUX"
        || upper == "STY"
}

/// Whitespace tokens of `command` that are absolute paths, with trailing
/// shell punctuation trimmed.
fn absolute_path_tokens(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .filter(|t| t.starts_with('/'))
        .map(|t| t.trim_end_matches([';', '|', '&', ')', '"', '\'']).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Resolve a path to its real location, like `realpath -m`: the longest
/// existing ancestor is canonicalized and the non-existing tail re-joined.
/// This keeps cloaking decisions symlink-proof without failing on paths
/// that do not exist yet.
pub fn resolve_real(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(real) = path.canonicalize() {
        return Ok(real);
    }
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    let mut cursor = path.to_path_buf();
    loop {
        match cursor.canonicalize() {
            Ok(real) => {
                let mut result = real;
                for part in tail.iter().rev() {
                    result.push(part);
                }
                return Ok(normalize_dots(&result));
            }
            Err(_) => {
                match cursor.file_name() {
                    Some(name) => {
                        tail.push(name.to_os_string());
                        cursor.pop();
                    }
                    // Ran out of components without finding an existing
                    // ancestor; resolution has genuinely failed.
                    None => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "no existing ancestor",
                        ))
                    }
                }
            }
        }
    }
}

/// Remove `.` and fold `..` in the unresolvable tail.
fn normalize_dots(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
