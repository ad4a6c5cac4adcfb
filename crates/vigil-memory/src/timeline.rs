// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-round timeline, sharded into one JSONL file per UTC day.
//!
//! The timeline is the runtime's objective record and the durable source of
//! the round counter: at startup the next round number is derived from the
//! highest round found across all shards.  Readers tolerate partial last
//! lines (parse-and-skip), so appends need no locking against the HTTP
//! layer.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One round's record.  The line schema is load-bearing — external consumers
/// parse it — so unknown fields must be tolerated on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub round: u64,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(default)]
    pub tools_used: u32,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub summary: String,
    /// The agent's working thoughts: assistant turns that triggered tool
    /// calls, excluding the final post-tool summary.
    #[serde(default)]
    pub action_log: String,
}

pub struct TimelineStore {
    dir: PathBuf,
}

impl TimelineStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn shard_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.jsonl", at.format("%Y-%m-%d")))
    }

    /// Append one entry to today's shard, creating directories as needed.
    pub fn append(&self, entry: &TimelineEntry) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.shard_path(entry.timestamp_utc);
        let mut line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?;
        file.write_all(line.as_bytes())?;
        debug!(round = entry.round, path = %path.display(), "timeline appended");
        Ok(())
    }

    /// All entries in chronological order (shards sorted by date, lines in
    /// file order).  Unparseable lines are skipped.
    pub fn read_all(&self) -> Vec<TimelineEntry> {
        let mut shards: Vec<PathBuf> = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "jsonl"))
                .collect(),
            Err(_) => return Vec::new(),
        };
        shards.sort();

        let mut entries = Vec::new();
        for shard in shards {
            let Ok(text) = std::fs::read_to_string(&shard) else {
                continue;
            };
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<TimelineEntry>(line) {
                    entries.push(entry);
                }
            }
        }
        entries
    }

    /// Highest round recorded, or 0 when the timeline is empty.  Used to
    /// resume the round counter after a restart.
    pub fn last_round(&self) -> u64 {
        self.read_all().iter().map(|e| e.round).max().unwrap_or(0)
    }

    /// The most recent `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<TimelineEntry> {
        let mut entries = self.read_all();
        if entries.len() > count {
            entries.drain(..entries.len() - count);
        }
        entries
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(round: u64) -> TimelineEntry {
        TimelineEntry {
            round,
            timestamp_utc: Utc::now(),
            tools_used: 2,
            duration_seconds: 1.5,
            summary: format!("[00:00:0{round}] did things"),
            action_log: String::new(),
        }
    }

    fn store() -> (tempfile::TempDir, TimelineStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimelineStore::new(dir.path().join("timeline"));
        (dir, store)
    }

    #[test]
    fn append_then_read_round_trips() {
        let (_dir, store) = store();
        store.append(&entry(1)).unwrap();
        store.append(&entry(2)).unwrap();
        let all = store.read_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].round, 1);
        assert_eq!(all[1].round, 2);
        assert_eq!(all[0].tools_used, 2);
    }

    #[test]
    fn last_round_is_zero_when_empty() {
        let (_dir, store) = store();
        assert_eq!(store.last_round(), 0);
    }

    #[test]
    fn last_round_is_maximum() {
        let (_dir, store) = store();
        store.append(&entry(5)).unwrap();
        store.append(&entry(42)).unwrap();
        store.append(&entry(7)).unwrap();
        assert_eq!(store.last_round(), 42);
    }

    #[test]
    fn recent_returns_tail_oldest_first() {
        let (_dir, store) = store();
        for r in 1..=5 {
            store.append(&entry(r)).unwrap();
        }
        let recent = store.recent(3);
        let rounds: Vec<u64> = recent.iter().map(|e| e.round).collect();
        assert_eq!(rounds, vec![3, 4, 5]);
    }

    #[test]
    fn recent_with_fewer_entries_returns_all() {
        let (_dir, store) = store();
        store.append(&entry(1)).unwrap();
        assert_eq!(store.recent(3).len(), 1);
    }

    #[test]
    fn partial_last_line_is_skipped() {
        let (_dir, store) = store();
        store.append(&entry(1)).unwrap();
        // Simulate a crash mid-append: a truncated JSON line at the end.
        let shard = store.shard_path(Utc::now());
        let mut f = std::fs::OpenOptions::new().append(true).open(&shard).unwrap();
        f.write_all(b"{\"round\": 2, \"timest").unwrap();
        let all = store.read_all();
        assert_eq!(all.len(), 1);
        assert_eq!(store.last_round(), 1);
    }

    #[test]
    fn unknown_fields_are_tolerated_on_read() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.dir.clone()).unwrap();
        let shard = store.shard_path(Utc::now());
        std::fs::write(
            &shard,
            "{\"round\":9,\"timestamp_utc\":\"2026-02-10T10:00:00Z\",\"tools_used\":1,\
             \"duration_seconds\":2.0,\"summary\":\"s\",\"action_log\":\"\",\
             \"added_by_future_version\":true}\n",
        )
        .unwrap();
        let all = store.read_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].round, 9);
    }

    #[test]
    fn shards_are_read_in_date_order() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.dir.clone()).unwrap();
        let mk = |name: &str, round: u64| {
            std::fs::write(
                store.dir.join(name),
                format!(
                    "{{\"round\":{round},\"timestamp_utc\":\"2026-02-10T10:00:00Z\",\
                     \"tools_used\":0,\"duration_seconds\":0.0,\"summary\":\"\",\
                     \"action_log\":\"\"}}\n"
                ),
            )
            .unwrap();
        };
        mk("2026-02-11.jsonl", 12);
        mk("2026-02-09.jsonl", 10);
        mk("2026-02-10.jsonl", 11);
        let rounds: Vec<u64> = store.read_all().iter().map(|e| e.round).collect();
        assert_eq!(rounds, vec![10, 11, 12]);
    }
}
