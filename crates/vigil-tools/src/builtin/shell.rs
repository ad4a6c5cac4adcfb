// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(unix)]
use libc;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::stealth::Stealth;
use crate::tool::{require_str, Tool, ToolCall};
use crate::truncate_output;

/// Built-in tool that runs a shell command in the agent's home.
pub struct ShellExecuteTool {
    pub home: PathBuf,
    pub timeout_secs: u64,
    pub max_output: usize,
    pub stealth: Arc<Stealth>,
}

#[async_trait]
impl Tool for ShellExecuteTool {
    fn name(&self) -> &str {
        "shell_execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command on the server and return stdout + stderr.\n\
         The command runs in your home directory with a time limit; output is\n\
         truncated when very long. Prefer non-interactive commands and avoid\n\
         anything that needs a TTY."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> String {
        let command = match require_str(call, "command") {
            Ok(c) => c.to_string(),
            Err(e) => return e,
        };

        if let Some(synthetic) = self.stealth.precheck_command(&command) {
            return synthetic;
        }

        debug!(cmd = %command, "shell_execute");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        cmd.current_dir(&self.home);
        cmd.env_clear();
        cmd.envs(self.stealth.sanitized_env());
        // No terminal, no stdin: the subprocess must not discover or disturb
        // the hosting session.  kill_on_drop reaps the child when the timeout
        // future is dropped.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(self.timeout_secs), cmd.output())
                .await;

        match result {
            Ok(Ok(output)) => {
                let mut text = String::new();
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                if text.trim().is_empty() {
                    return format!(
                        "(no output, exit code: {})",
                        output.status.code().unwrap_or(-1)
                    );
                }
                let filtered = self.stealth.filter_output(&command, &text);
                truncate_output(&filtered, self.max_output)
            }
            Ok(Err(e)) => format!("(error: {e})"),
            Err(_) => format!("(error: command timed out after {}s)", self.timeout_secs),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::stealth::HostSession;

    fn tool_with(dir: &std::path::Path, timeout: u64) -> (ShellExecuteTool, PathBuf) {
        let project = dir.join("runtime");
        std::fs::create_dir_all(&project).unwrap();
        let home = dir.join("home");
        std::fs::create_dir_all(&home).unwrap();
        let stealth = Arc::new(Stealth::new(&project, 1, &HostSession::default(), Some(8080)));
        (
            ShellExecuteTool {
                home: home.clone(),
                timeout_secs: timeout,
                max_output: 4000,
                stealth,
            },
            home,
        )
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "s1".into(),
            name: "shell_execute".into(),
            args,
        }
    }

    #[tokio::test]
    async fn executes_echo_and_returns_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t.execute(&call(json!({"command": "echo hello"}))).await;
        assert!(out.contains("hello"), "{out}");
    }

    #[tokio::test]
    async fn stdout_and_stderr_both_captured() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t
            .execute(&call(json!({"command": "echo out && echo err >&2"})))
            .await;
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[tokio::test]
    async fn runs_in_agent_home() {
        let dir = tempfile::tempdir().unwrap();
        let (t, home) = tool_with(dir.path(), 10);
        let out = t.execute(&call(json!({"command": "pwd"}))).await;
        assert!(out.contains(home.file_name().unwrap().to_str().unwrap()), "{out}");
    }

    #[tokio::test]
    async fn empty_output_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t.execute(&call(json!({"command": "true"}))).await;
        assert_eq!(out, "(no output, exit code: 0)");
        let out = t.execute(&call(json!({"command": "exit 3"}))).await;
        assert_eq!(out, "(no output, exit code: 3)");
    }

    #[tokio::test]
    async fn timeout_returns_error_string() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 1);
        let out = t.execute(&call(json!({"command": "sleep 30"}))).await;
        assert!(out.contains("timed out after 1s"), "{out}");
    }

    #[tokio::test]
    async fn missing_command_argument_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t.execute(&call(json!({}))).await;
        assert!(out.contains("missing required parameter 'command'"));
    }

    #[tokio::test]
    async fn project_path_in_command_is_prechecked() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let cmd = format!("ls {}", dir.path().join("runtime").display());
        let out = t.execute(&call(json!({"command": cmd}))).await;
        assert!(out.contains("No such file or directory"), "{out}");
    }

    #[tokio::test]
    async fn management_port_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t
            .execute(&call(json!({"command": "curl http://127.0.0.1:8080/api/status"})))
            .await;
        assert!(out.contains("Connection refused"), "{out}");
    }

    #[tokio::test]
    async fn listing_parent_hides_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let cmd = format!("ls {}", dir.path().display());
        let out = t.execute(&call(json!({"command": cmd}))).await;
        assert!(!out.contains("runtime"), "{out}");
        assert!(out.contains("home"), "{out}");
    }

    #[tokio::test]
    async fn session_env_is_not_visible_to_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t
            .execute(&call(json!({"command": "echo TMUX=${TMUX:-unset} STY=${STY:-unset}"})))
            .await;
        assert!(out.contains("TMUX=unset"), "{out}");
        assert!(out.contains("STY=unset"), "{out}");
    }

    #[tokio::test]
    async fn long_output_is_truncated_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (t, _) = tool_with(dir.path(), 10);
        let out = t.execute(&call(json!({"command": "yes x | head -5000"}))).await;
        assert!(out.len() < 4200, "len={}", out.len());
        assert!(out.contains("truncated"), "{out}");
    }
}
