// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod auditor;
pub mod feed;
pub mod inspiration;
pub mod snapshot;
pub mod timeline;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use vigil_model::ModelProvider;

pub use auditor::SnapshotUpdater;
pub use feed::{FeedPost, FeedStore};
pub use inspiration::InspirationStore;
pub use snapshot::{Snapshot, SnapshotDelta};
pub use timeline::{TimelineEntry, TimelineStore};

#[derive(Debug, Error)]
pub enum MemoryError {
    /// Both audit attempts failed; the world-model cannot be brought up to
    /// date.  Fatal upstream: stale awareness is worse than stopping.
    #[error("snapshot update failed: {0}")]
    SnapshotUpdate(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything that happens to durable state after a round, in order:
/// timeline append (best-effort), snapshot audit + merge (fatal on double
/// failure), feed append (best-effort).
pub struct MemoryPipeline {
    pub timeline: TimelineStore,
    pub inspiration: InspirationStore,
    pub feed: FeedStore,
    snapshot_path: PathBuf,
    updater: SnapshotUpdater,
}

impl MemoryPipeline {
    pub fn new(
        data_dir: PathBuf,
        auditor: Option<Arc<dyn ModelProvider>>,
        main: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            timeline: TimelineStore::new(data_dir.join("timeline")),
            inspiration: InspirationStore::new(data_dir.join("inspiration.txt")),
            feed: FeedStore::new(data_dir.join("feed.jsonl")),
            snapshot_path: data_dir.join("snapshot.yaml"),
            updater: SnapshotUpdater::new(auditor, main),
        }
    }

    pub fn load_snapshot(&self) -> Snapshot {
        Snapshot::load(&self.snapshot_path)
    }

    /// Run the full post-round pipeline for `entry`.
    ///
    /// `final_output` is the round's closing text, used by the auditor only
    /// for quote extraction.
    pub async fn finish_round(
        &self,
        entry: &TimelineEntry,
        final_output: &str,
    ) -> Result<(), MemoryError> {
        // (a) Timeline append — best-effort: the counter derives from the
        // last successful append, so a miss costs history, not correctness.
        if let Err(e) = self.timeline.append(entry) {
            warn!(round = entry.round, error = %e, "timeline append failed");
        }

        // (b) Snapshot audit + merge.
        let mut snapshot = self.load_snapshot();
        let delta = self
            .updater
            .produce_delta(&snapshot, &entry.action_log, final_output)
            .await
            .map_err(MemoryError::SnapshotUpdate)?;
        snapshot.apply(&delta, entry.round, Utc::now());
        snapshot.save(&self.snapshot_path)?;
        info!(round = entry.round, "snapshot updated");

        // (c) Feed append when the round produced visible activity.
        if !delta.activity.content.trim().is_empty() {
            let post = FeedPost::from_activity(
                entry.round,
                entry.timestamp_utc,
                &delta.activity.content,
                &delta.activity.tags,
                delta.activity.quote.as_deref(),
            );
            if let Err(e) = self.feed.append(&post) {
                warn!(round = entry.round, error = %e, "feed append failed");
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::mock::MockProvider;
    use vigil_model::ResponseEvent;

    fn delta_turn(yaml: &str) -> Vec<ResponseEvent> {
        vec![ResponseEvent::TextDelta(yaml.to_string()), ResponseEvent::Done]
    }

    fn entry(round: u64) -> TimelineEntry {
        TimelineEntry {
            round,
            timestamp_utc: Utc::now(),
            tools_used: 1,
            duration_seconds: 2.0,
            summary: "[10:00:00] worked".into(),
            action_log: "[10:00:00] working".into(),
        }
    }

    #[tokio::test]
    async fn finish_round_updates_all_three_stores() {
        let dir = tempfile::tempdir().unwrap();
        let main = Arc::new(MockProvider::new(vec![delta_turn(
            "add:\n  services:\n    - {name: web, port: 80}\n\
             activity:\n  content: started a web server\n  tags: [web]\n",
        )]));
        let pipeline = MemoryPipeline::new(dir.path().to_path_buf(), None, main);
        pipeline.finish_round(&entry(1), "done for today").await.unwrap();

        assert_eq!(pipeline.timeline.last_round(), 1);
        let snap = pipeline.load_snapshot();
        assert_eq!(snap.meta.round, 1);
        assert_eq!(snap.services.len(), 1);
        let posts = pipeline.feed.read_all();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].content, "started a web server");
    }

    #[tokio::test]
    async fn empty_activity_skips_feed() {
        let dir = tempfile::tempdir().unwrap();
        let main = Arc::new(MockProvider::new(vec![delta_turn("no_changes: true\n")]));
        let pipeline = MemoryPipeline::new(dir.path().to_path_buf(), None, main);
        pipeline.finish_round(&entry(1), "").await.unwrap();
        assert!(pipeline.feed.read_all().is_empty());
    }

    #[tokio::test]
    async fn double_audit_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let auditor = Arc::new(MockProvider::new(vec![vec![ResponseEvent::Done]]));
        let main = Arc::new(MockProvider::new(vec![vec![ResponseEvent::Done]]));
        let pipeline = MemoryPipeline::new(dir.path().to_path_buf(), Some(auditor), main);
        let err = pipeline.finish_round(&entry(1), "").await.unwrap_err();
        assert!(matches!(err, MemoryError::SnapshotUpdate(_)));
        // The timeline entry still landed before the failure.
        assert_eq!(pipeline.timeline.last_round(), 1);
    }

    #[tokio::test]
    async fn snapshot_survives_across_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let main = Arc::new(MockProvider::new(vec![
            delta_turn("add:\n  projects:\n    - {path: /home/agent/site}\nactivity: {content: made a site}\n"),
            delta_turn("no_changes: true\nactivity: {content: rested}\n"),
        ]));
        let pipeline = MemoryPipeline::new(dir.path().to_path_buf(), None, main);
        pipeline.finish_round(&entry(1), "").await.unwrap();
        pipeline.finish_round(&entry(2), "").await.unwrap();
        let snap = pipeline.load_snapshot();
        assert_eq!(snap.meta.round, 2);
        assert_eq!(snap.projects.len(), 1, "earlier additions persist");
    }
}
