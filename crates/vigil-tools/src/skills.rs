// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill provider contract and the filesystem-backed default.
//!
//! A skill is a directory with a `skill.md` (YAML frontmatter + body) and
//! optional bundled resources (`scripts/`, `references/`).  Skills follow
//! progressive disclosure: only name and one-line description go into the
//! system prompt; the agent reads the full body on demand via `skill_read`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::stealth::resolve_real;

#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub enabled: bool,
}

#[async_trait]
pub trait SkillProvider: Send + Sync {
    fn list(&self) -> Vec<SkillInfo>;
    /// Read one file inside the named skill directory.  `relpath` must stay
    /// inside the skill; an empty path means `skill.md`.
    fn read_file(&self, skill: &str, relpath: &str) -> Result<String, String>;
    /// Execute `<skill>/scripts/<script>` with the given arguments.
    async fn exec_script(
        &self,
        skill: &str,
        script: &str,
        args: &[String],
    ) -> Result<String, String>;
}

/// Frontmatter of a `skill.md`.
#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Filesystem-backed skills under one root directory.
pub struct FsSkillProvider {
    root: PathBuf,
    /// Environment for skill scripts — pre-sanitized by the caller.
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl FsSkillProvider {
    pub fn new(root: PathBuf, env: Vec<(String, String)>, timeout_secs: u64) -> Self {
        Self {
            root,
            env,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn skill_dir(&self, skill: &str) -> Result<PathBuf, String> {
        // Reject separators outright; the realpath check below is the
        // backstop, this keeps error messages honest.
        if skill.contains('/') || skill.contains("..") || skill.is_empty() {
            return Err(format!("(error: unknown skill '{skill}')"));
        }
        let dir = self.root.join(skill);
        if !dir.is_dir() {
            return Err(format!("(error: unknown skill '{skill}')"));
        }
        Ok(dir)
    }

    /// Resolve `candidate` and require it to stay inside `base`.
    fn confine(base: &Path, candidate: &Path) -> Result<PathBuf, String> {
        let real_base = resolve_real(base).map_err(|e| format!("(error: {e})"))?;
        let real = resolve_real(candidate).map_err(|e| format!("(error: {e})"))?;
        if real == real_base || real.starts_with(&real_base) {
            Ok(real)
        } else {
            Err("(error: path escapes the skill directory)".to_string())
        }
    }
}

#[async_trait]
impl SkillProvider for FsSkillProvider {
    fn list(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return skills,
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let manifest = dir.join("skill.md");
            let Ok(text) = std::fs::read_to_string(&manifest) else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let (front, body) = split_frontmatter(&text);
            let meta: SkillFrontmatter = front
                .and_then(|f| serde_yaml::from_str(f).ok())
                .unwrap_or_default();
            let description = meta
                .description
                .or_else(|| first_paragraph_line(body))
                .unwrap_or_default();
            skills.push(SkillInfo {
                title: meta.title.unwrap_or_else(|| name.clone()),
                name,
                description,
                enabled: meta.enabled,
            });
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    fn read_file(&self, skill: &str, relpath: &str) -> Result<String, String> {
        let dir = self.skill_dir(skill)?;
        let relpath = if relpath.is_empty() { "skill.md" } else { relpath };
        let real = Self::confine(&dir, &dir.join(relpath))?;
        let content = std::fs::read_to_string(&real)
            .map_err(|e| format!("(error: cannot read {relpath}: {e})"))?;

        if relpath == "skill.md" {
            // Include a bundled-file listing so the agent knows what is
            // available without crawling the directory itself.
            let mut files: Vec<String> = WalkDir::new(&dir)
                .min_depth(1)
                .into_iter()
                .flatten()
                .filter(|e| e.file_type().is_file())
                .filter_map(|e| {
                    e.path()
                        .strip_prefix(&dir)
                        .ok()
                        .map(|p| p.to_string_lossy().into_owned())
                })
                .filter(|p| p != "skill.md")
                .take(20)
                .collect();
            files.sort();
            if files.is_empty() {
                return Ok(content);
            }
            return Ok(format!("{content}\n\nBundled files:\n{}", files.join("\n")));
        }
        Ok(content)
    }

    async fn exec_script(
        &self,
        skill: &str,
        script: &str,
        args: &[String],
    ) -> Result<String, String> {
        let dir = self.skill_dir(skill)?;
        let candidate = dir.join("scripts").join(script);
        let real = Self::confine(&dir, &candidate)?;
        if !real.is_file() {
            return Err(format!("(error: no such script '{script}' in skill '{skill}')"));
        }

        debug!(skill, script, "executing skill script");

        let mut cmd = tokio::process::Command::new(&real);
        cmd.args(args);
        cmd.current_dir(&dir);
        cmd.env_clear();
        cmd.envs(self.env.iter().cloned());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let out = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                format!("(error: script timed out after {}s)", self.timeout.as_secs())
            })?
            .map_err(|e| format!("(error: {e})"))?;

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&out.stdout));
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            warn!(skill, script, code = out.status.code(), "skill script failed");
        }
        if text.trim().is_empty() {
            text = format!("(no output, exit code: {})", out.status.code().unwrap_or(-1));
        }
        Ok(text)
    }
}

/// Split `---` YAML frontmatter from the body.  Returns (frontmatter, body).
fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };
    match rest.split_once("\n---") {
        Some((front, body)) => (Some(front), body.trim_start_matches(['-', '\n'])),
        None => (None, text),
    }
}

fn first_paragraph_line(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
