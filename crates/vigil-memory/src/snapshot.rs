// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent's structured world-model: one YAML document, updated per round
//! by merging an auditor-produced delta.
//!
//! Each list section has a designated key field; merging is keyed on it.
//! Deltas are additive/mutative/subtractive only — the auditor never
//! rewrites the whole document, which keeps one bad round from erasing the
//! inventory.  Entries are kept as open YAML mappings: the auditor decides
//! the fields, the merge only owns the keys.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

pub const SECTIONS: &[&str] = &[
    "services",
    "projects",
    "tools",
    "documents",
    "environment",
    "issues",
];

/// Key field per list section.  `environment` is a flat mapping, not a list.
pub fn key_field(section: &str) -> Option<&'static str> {
    match section {
        "services" => Some("name"),
        "projects" | "tools" | "documents" => Some("path"),
        "issues" => Some("summary"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMeta {
    #[serde(default)]
    pub round: u64,
    #[serde(default)]
    pub last_updated: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub meta: SnapshotMeta,
    #[serde(default)]
    pub services: Vec<Value>,
    #[serde(default)]
    pub projects: Vec<Value>,
    #[serde(default)]
    pub tools: Vec<Value>,
    #[serde(default)]
    pub documents: Vec<Value>,
    #[serde(default)]
    pub environment: Mapping,
    #[serde(default)]
    pub issues: Vec<Value>,
}

/// Per-round activity block, always present in a well-formed delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub quote: Option<String>,
}

/// The auditor's patch for one round.  Consumed once, never stored.
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotDelta {
    #[serde(default)]
    pub no_changes: bool,
    #[serde(default)]
    pub add: Mapping,
    #[serde(default)]
    pub update: Mapping,
    #[serde(default)]
    pub remove: Mapping,
    #[serde(default)]
    pub activity: Activity,
}

impl SnapshotDelta {
    /// Parse the auditor's output.  Markdown fences around the YAML are
    /// tolerated.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(strip_fences(text))
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("yaml") up to the first newline.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

impl Snapshot {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                Snapshot::default()
            }),
            Err(_) => Snapshot::default(),
        }
    }

    /// Full-replace save, atomically where the platform permits
    /// (write-then-rename within the target directory).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn section_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        match name {
            "services" => Some(&mut self.services),
            "projects" => Some(&mut self.projects),
            "tools" => Some(&mut self.tools),
            "documents" => Some(&mut self.documents),
            "issues" => Some(&mut self.issues),
            _ => None,
        }
    }

    fn section(&self, name: &str) -> Option<&Vec<Value>> {
        match name {
            "services" => Some(&self.services),
            "projects" => Some(&self.projects),
            "tools" => Some(&self.tools),
            "documents" => Some(&self.documents),
            "issues" => Some(&self.issues),
            _ => None,
        }
    }

    /// Merge one delta and stamp `meta`.  See the delta semantics in the
    /// module docs; resolved issues are purged after the merge so they never
    /// survive past one round.
    pub fn apply(&mut self, delta: &SnapshotDelta, round: u64, now: DateTime<Utc>) {
        self.meta.round = round;
        self.meta.last_updated = now.to_rfc3339_opts(SecondsFormat::Secs, true);

        if delta.no_changes {
            return;
        }

        // add: append entries whose key is not yet present.
        for (section, entries) in &delta.add {
            let Some(section) = section.as_str() else { continue };
            let (Some(key), Some(list)) = (key_field(section), self.section_mut(section)) else {
                continue;
            };
            let Some(new_entries) = entries.as_sequence() else { continue };
            for entry in new_entries {
                match entry_key(entry, key) {
                    Some(k) if list.iter().any(|e| entry_key(e, key).as_deref() == Some(&k)) => {
                        // duplicate key — silently skipped
                    }
                    Some(_) => list.push(entry.clone()),
                    None => {}
                }
            }
        }

        // update: overlay patch fields onto the keyed entry; environment is
        // a shallow dict merge instead.
        for (section, patches) in &delta.update {
            let Some(section) = section.as_str() else { continue };
            if section == "environment" {
                if let Some(map) = patches.as_mapping() {
                    for (k, v) in map {
                        self.environment.insert(k.clone(), v.clone());
                    }
                }
                continue;
            }
            let (Some(key), Some(list)) = (key_field(section), self.section_mut(section)) else {
                continue;
            };
            let Some(patch_list) = patches.as_sequence() else { continue };
            for patch in patch_list {
                let Some(k) = entry_key(patch, key) else { continue };
                let Some(target) = list
                    .iter_mut()
                    .find(|e| entry_key(e, key).as_deref() == Some(&k))
                else {
                    continue;
                };
                let (Some(target_map), Some(patch_map)) =
                    (target.as_mapping_mut(), patch.as_mapping())
                else {
                    continue;
                };
                for (field, value) in patch_map {
                    if field.as_str() == Some(key) {
                        continue;
                    }
                    // replace, not merge — values describe current state
                    target_map.insert(field.clone(), value.clone());
                }
            }
        }

        // remove: delete entries whose key matches.
        for (section, keys) in &delta.remove {
            let Some(section) = section.as_str() else { continue };
            let (Some(key), Some(list)) = (key_field(section), self.section_mut(section)) else {
                continue;
            };
            let Some(keys) = keys.as_sequence() else { continue };
            let doomed: Vec<String> = keys
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect();
            list.retain(|e| {
                entry_key(e, key).map_or(true, |k| !doomed.contains(&k))
            });
        }

        // Resolved issues never persist past one merge.
        self.issues.retain(|issue| {
            issue
                .get("status")
                .and_then(Value::as_str)
                .map_or(true, |s| s != "resolved")
        });
    }

    /// Render the snapshot as the Markdown injected into the system prompt.
    /// Section order is stable; closed issues are already purged by `apply`
    /// and additionally filtered here.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "## System Snapshot\nRound {}, updated {}\n",
            self.meta.round,
            if self.meta.last_updated.is_empty() {
                "never"
            } else {
                self.meta.last_updated.as_str()
            }
        ));

        out.push_str("\n### Services\n");
        out.push_str(&render_table(&self.services, "name"));

        for (title, section) in [
            ("Projects", &self.projects),
            ("Tools", &self.tools),
            ("Documents", &self.documents),
        ] {
            out.push_str(&format!("\n### {title}\n"));
            out.push_str(&render_list(section, "path"));
        }

        out.push_str("\n### Environment\n");
        if self.environment.is_empty() {
            out.push_str("(none)\n");
        } else {
            for (k, v) in &self.environment {
                out.push_str(&format!(
                    "- {}: {}\n",
                    scalar(k),
                    scalar(v)
                ));
            }
        }

        out.push_str("\n### Open Issues\n");
        let open: Vec<Value> = self
            .issues
            .iter()
            .filter(|i| {
                i.get("status")
                    .and_then(Value::as_str)
                    .map_or(true, |s| s != "resolved")
            })
            .cloned()
            .collect();
        out.push_str(&render_list(&open, "summary"));

        out
    }

    /// True when every section holds no entries (meta aside).
    pub fn is_empty(&self) -> bool {
        SECTIONS
            .iter()
            .all(|s| self.section(s).map_or(true, |l| l.is_empty()))
            && self.environment.is_empty()
    }
}

/// String value of an entry's key field.
fn entry_key(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

/// Markdown table over the union of entry fields, key column first.
fn render_table(entries: &[Value], key: &str) -> String {
    if entries.is_empty() {
        return "(none)\n".to_string();
    }
    let mut columns: Vec<String> = vec![key.to_string()];
    for entry in entries {
        if let Some(map) = entry.as_mapping() {
            for k in map.keys() {
                if let Some(name) = k.as_str() {
                    if !columns.iter().any(|c| c == name) {
                        columns.push(name.to_string());
                    }
                }
            }
        }
    }
    let mut out = format!("| {} |\n", columns.join(" | "));
    out.push_str(&format!("|{}\n", "---|".repeat(columns.len())));
    for entry in entries {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| entry.get(c.as_str()).map(scalar).unwrap_or_default())
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

/// Bulleted list: key value first, remaining fields appended as `k: v`.
fn render_list(entries: &[Value], key: &str) -> String {
    if entries.is_empty() {
        return "(none)\n".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let lead = entry_key(entry, key).unwrap_or_else(|| scalar(entry));
        let mut extras: Vec<String> = Vec::new();
        if let Some(map) = entry.as_mapping() {
            for (k, v) in map {
                if k.as_str() == Some(key) {
                    continue;
                }
                extras.push(format!("{}: {}", scalar(k), scalar(v)));
            }
        }
        if extras.is_empty() {
            out.push_str(&format!("- {lead}\n"));
        } else {
            out.push_str(&format!("- {lead} ({})\n", extras.join(", ")));
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
