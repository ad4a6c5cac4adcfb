// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Public activity feed: one JSONL file of per-round posts derived from the
//! delta's activity block.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    pub round: u64,
    pub timestamp_utc: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

impl FeedPost {
    /// Build a post from an activity block.  Tags are normalised to trimmed,
    /// non-empty strings; the quote is kept only when non-empty.
    pub fn from_activity(
        round: u64,
        timestamp_utc: DateTime<Utc>,
        content: &str,
        tags: &[String],
        quote: Option<&str>,
    ) -> Self {
        Self {
            round,
            timestamp_utc,
            content: content.trim().to_string(),
            tags: tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            quote: quote.map(str::trim).filter(|q| !q.is_empty()).map(str::to_string),
        }
    }
}

pub struct FeedStore {
    path: PathBuf,
}

impl FeedStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, post: &FeedPost) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(post)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// All posts in append order; unparseable lines are skipped.
    pub fn read_all(&self) -> Vec<FeedPost> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|l| serde_json::from_str(l.trim()).ok())
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
