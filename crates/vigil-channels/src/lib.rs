// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ordered fan-out of runtime events to operator consoles.
//!
//! The worker produces events; each connected console owns a bounded queue.
//! Two delivery classes:
//!
//! - **Ordered** (`send`): the producer waits for every subscriber's queue,
//!   bounded by a short timeout.  This preserves ordering and the natural
//!   pacing of a round; a subscriber that stays blocked past the timeout is
//!   dropped from the set.
//! - **Fire-and-forget** (`send_fast`): high-frequency deltas
//!   (`thought_chunk`, loading updates) are `try_send`-ed and silently
//!   dropped when a queue is full.  A slow consumer loses fast events but
//!   never sees ordered events reordered.
//!
//! New subscribers receive only events emitted after they join.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Per-subscriber queue depth.  Deep enough to absorb a full round of
/// ordered events; fast events overflow first by design.
const SUBSCRIBER_QUEUE: usize = 256;

/// How long an ordered send may block on one subscriber.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Event kinds carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Log,
    Status,
    Round,
    Thought,
    ThoughtChunk,
    ThoughtDone,
    Loading,
    ToolCall,
    ToolResult,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Log => "log",
            EventKind::Status => "status",
            EventKind::Round => "round",
            EventKind::Thought => "thought",
            EventKind::ThoughtChunk => "thought_chunk",
            EventKind::ThoughtDone => "thought_done",
            EventKind::Loading => "loading",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
        }
    }
}

/// Wire envelope delivered to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: serde_json::Value,
    /// ISO-8601 UTC production time.
    pub timestamp: String,
}

impl Envelope {
    fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind: kind.as_str(),
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Envelope>,
}

/// The broadcast bus.  Cheap to share (`Arc<Broadcaster>`); the subscriber
/// list lives behind a plain mutex that is never held across an await.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new console.  The receiver sees only future events.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = Uuid::new_v4();
        self.subscribers.lock().unwrap().push(Subscriber { id, tx });
        debug!(%id, "subscriber attached");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Ordered delivery: waits on each subscriber up to [`SEND_TIMEOUT`];
    /// subscribers whose queue stays blocked or whose receiver is gone are
    /// removed from the set.
    pub async fn send(&self, kind: EventKind, data: serde_json::Value) {
        let envelope = Envelope::new(kind, data);
        let targets: Vec<(Uuid, mpsc::Sender<Envelope>)> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut dead: Vec<Uuid> = Vec::new();
        for (id, tx) in targets {
            let ok = tokio::time::timeout(SEND_TIMEOUT, tx.send(envelope.clone()))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !ok {
                debug!(%id, "dropping unresponsive subscriber");
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            self.subscribers
                .lock()
                .unwrap()
                .retain(|s| !dead.contains(&s.id));
        }
    }

    /// Fire-and-forget delivery for high-frequency deltas.  A full queue
    /// drops the event; a closed receiver drops the subscriber.
    pub fn send_fast(&self, kind: EventKind, data: serde_json::Value) {
        let envelope = Envelope::new(kind, data);
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| {
            match s.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true, // coalesce by dropping
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
