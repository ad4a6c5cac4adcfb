// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod community;
pub mod edit_file;
pub mod read_file;
pub mod shell;
pub mod skill;
pub mod write_file;

use std::path::PathBuf;
use std::sync::Arc;

use crate::registry::ToolRegistry;
use crate::skills::SkillProvider;
use crate::stealth::Stealth;

pub use community::CommunityTool;
pub use edit_file::EditFileTool;
pub use read_file::ReadFileTool;
pub use shell::ShellExecuteTool;
pub use skill::{SkillExecTool, SkillReadTool};
pub use write_file::WriteFileTool;

/// Which tool families the round enables.
#[derive(Debug, Clone, Copy)]
pub struct ToolFlags {
    pub shell: bool,
    pub files: bool,
    pub edit: bool,
    pub skills: bool,
    pub community: bool,
}

impl Default for ToolFlags {
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

/// Assemble the round's tool registry.  Skill tools require a provider and
/// the community tool requires `(server_url, api_key)`; a missing backing
/// wins over the enable flag.
pub fn standard_registry(
    home: PathBuf,
    shell_timeout_secs: u64,
    max_output: usize,
    stealth: Arc<Stealth>,
    flags: ToolFlags,
    skills: Option<Arc<dyn SkillProvider>>,
    community: Option<(String, String)>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    if flags.shell {
        registry.register(ShellExecuteTool {
            home: home.clone(),
            timeout_secs: shell_timeout_secs,
            max_output,
            stealth: Arc::clone(&stealth),
        });
    }
    if flags.files {
        registry.register(ReadFileTool {
            home: home.clone(),
            max_output,
            stealth: Arc::clone(&stealth),
        });
        registry.register(WriteFileTool {
            home: home.clone(),
            stealth: Arc::clone(&stealth),
        });
    }
    if flags.edit {
        registry.register(EditFileTool {
            home,
            stealth: Arc::clone(&stealth),
        });
    }
    if flags.skills {
        if let Some(provider) = skills {
            registry.register(SkillReadTool {
                provider: Arc::clone(&provider),
            });
            registry.register(SkillExecTool { provider });
        }
    }
    if flags.community {
        if let Some((server_url, api_key)) = community {
            registry.register(CommunityTool {
                server_url,
                api_key,
                client: reqwest::Client::new(),
            });
        }
    }

    registry
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::HostSession;

    fn stealth(dir: &std::path::Path) -> Arc<Stealth> {
        Arc::new(Stealth::new(dir, 1, &HostSession::default(), None))
    }

    #[test]
    fn full_registry_has_core_tools() {
        let dir = tempfile::tempdir().unwrap();
        let reg = standard_registry(
            dir.path().to_path_buf(),
            30,
            4000,
            stealth(dir.path()),
            ToolFlags::default(),
            None,
            Some(("http://example.org".into(), "k".into())),
        );
        let names = reg.names();
        assert_eq!(
            names,
            vec!["community", "edit_file", "read_file", "shell_execute", "write_file"]
        );
    }

    #[test]
    fn flags_gate_tool_families() {
        let dir = tempfile::tempdir().unwrap();
        let flags = ToolFlags {
            shell: false,
            files: true,
            edit: false,
            skills: false,
            community: false,
        };
        let reg = standard_registry(
            dir.path().to_path_buf(),
            30,
            4000,
            stealth(dir.path()),
            flags,
            None,
            None,
        );
        assert_eq!(reg.names(), vec!["read_file", "write_file"]);
    }

    #[test]
    fn community_requires_backing_config() {
        let dir = tempfile::tempdir().unwrap();
        let reg = standard_registry(
            dir.path().to_path_buf(),
            30,
            4000,
            stealth(dir.path()),
            ToolFlags::default(),
            None,
            None,
        );
        assert!(!reg.names().contains(&"community".to_string()));
    }
}
