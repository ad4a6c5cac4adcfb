// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Round lifecycle: resolve the counter, drive rounds on a worker task,
//! sleep out the interval, observe the stop signal.
//!
//! Cancellation is cooperative and observed at three points only: before
//! the next model call, before the next tool call, and during the interval
//! sleep.  An in-flight tool call always runs to completion or its own
//! timeout, so a stop request yields within one model round-trip plus one
//! tool timeout.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vigil_channels::{Broadcaster, EventKind};
use vigil_config::Config;
use vigil_memory::{MemoryError, MemoryPipeline, TimelineEntry};
use vigil_model::ModelProvider;
use vigil_tools::{standard_registry, HostSession, SkillProvider, Stealth, ToolFlags};

use crate::agent::ToolLoop;
use crate::context::{assemble_messages, final_output_of, ContextInputs};
use crate::persona::PersonaProvider;
use crate::state::{RunPhase, RunState};

/// How long `restart` waits for the old worker to finish its round.
const RESTART_JOIN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("activation loop is already running")]
    AlreadyRunning,
    #[error("failed to store inspiration: {0}")]
    Inspire(#[from] std::io::Error),
}

/// Everything a round needs, wired once at assembly.
pub struct SchedulerDeps {
    pub config: Config,
    pub model: Arc<dyn ModelProvider>,
    pub memory: MemoryPipeline,
    pub bus: Arc<Broadcaster>,
    pub persona: Arc<dyn PersonaProvider>,
    pub skills: Option<Arc<dyn SkillProvider>>,
    /// The runtime's own installation directory — the root of everything
    /// the stealth layer hides.
    pub project_dir: PathBuf,
    pub host: HostSession,
}

struct RoundOutcome {
    tools_used: u32,
    duration: f64,
    final_output: String,
}

pub struct Scheduler {
    deps: Arc<SchedulerDeps>,
    state: Arc<StdMutex<RunState>>,
    cancel: StdMutex<Option<watch::Sender<bool>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(deps: SchedulerDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            state: Arc::new(StdMutex::new(RunState::default())),
            cancel: StdMutex::new(None),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// The round number the next activation will use.  Derived from the
    /// timeline only; computing it writes nothing.
    pub fn next_round(&self) -> u64 {
        self.deps.memory.timeline.last_round() + 1
    }

    /// Launch the activation loop on a worker task.  Returns immediately.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let next = self.next_round();
        {
            let mut st = self.state.lock().unwrap();
            if matches!(
                st.state,
                RunPhase::Running | RunPhase::Waiting | RunPhase::Stopping
            ) {
                return Err(SchedulerError::AlreadyRunning);
            }
            st.state = RunPhase::Running;
            st.current_round = next;
        }

        let (tx, rx) = watch::channel(false);
        *self.cancel.lock().unwrap() = Some(tx);

        let deps = Arc::clone(&self.deps);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(run_worker(deps, state, rx));
        *self.worker.lock().await = Some(handle);

        info!(round = next, "activation loop started");
        Ok(())
    }

    /// Request a stop.  The worker finishes the current round first.
    /// Idempotent: stopping an idle scheduler does nothing.
    pub async fn stop(&self) {
        if let Some(tx) = self.cancel.lock().unwrap().as_ref() {
            let _ = tx.send(true);
        }
        let transitioned = {
            let mut st = self.state.lock().unwrap();
            if matches!(st.state, RunPhase::Running | RunPhase::Waiting) {
                st.state = RunPhase::Stopping;
                true
            } else {
                false
            }
        };
        if transitioned {
            self.deps
                .bus
                .send(EventKind::Status, json!({ "state": RunPhase::Stopping.as_str() }))
                .await;
            info!("stop requested, finishing current round");
        }
    }

    /// Stop, wait for the worker (bounded), start again.
    pub async fn restart(&self) -> Result<(), SchedulerError> {
        self.stop().await;
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(RESTART_JOIN_TIMEOUT, handle).await.is_err() {
                warn!("worker did not finish within the restart window");
            }
        }
        {
            // The join may have raced the worker's final transition (or the
            // worker died in Error); force Idle so start() accepts.
            self.state.lock().unwrap().state = RunPhase::Idle;
        }
        self.start().await
    }

    /// Snapshot of the run state.
    pub fn status(&self) -> RunState {
        self.state.lock().unwrap().clone()
    }

    /// Store an operator message for the next round (overwrite-or-create).
    pub fn inspire(&self, text: &str) -> Result<(), SchedulerError> {
        self.deps.memory.inspiration.write(text)?;
        Ok(())
    }

    /// Run exactly one round on the caller's task.  Used by `--once` and by
    /// tests; the state machine transitions mirror the worker's.
    pub async fn run_once(&self) -> Result<(), MemoryError> {
        let round = self.next_round();
        {
            let mut st = self.state.lock().unwrap();
            st.state = RunPhase::Running;
            st.current_round = round;
        }
        let (_tx, rx) = watch::channel(false);
        let outcome = run_round(&self.deps, &self.state, round, &rx).await;
        let mut st = self.state.lock().unwrap();
        match outcome {
            Ok(_) => {
                st.state = RunPhase::Idle;
                Ok(())
            }
            Err(e) => {
                st.state = RunPhase::Error;
                Err(e)
            }
        }
    }
}

async fn set_phase(state: &Arc<StdMutex<RunState>>, bus: &Broadcaster, phase: RunPhase) {
    state.lock().unwrap().state = phase;
    bus.send(EventKind::Status, json!({ "state": phase.as_str() }))
        .await;
}

/// The worker: one round after another until cancelled or a fatal memory
/// failure.
async fn run_worker(
    deps: Arc<SchedulerDeps>,
    state: Arc<StdMutex<RunState>>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut round = state.lock().unwrap().current_round;

    loop {
        if *cancel.borrow() {
            break;
        }

        set_phase(&state, &deps.bus, RunPhase::Running).await;
        {
            state.lock().unwrap().current_round = round;
        }

        match run_round(&deps, &state, round, &cancel).await {
            Ok(()) => {}
            Err(e) => {
                error!(round, error = %e, "fatal memory failure, stopping loop");
                deps.bus
                    .send(
                        EventKind::Log,
                        json!({ "message": format!("round {round} failed fatally: {e}") }),
                    )
                    .await;
                set_phase(&state, &deps.bus, RunPhase::Error).await;
                return;
            }
        }

        set_phase(&state, &deps.bus, RunPhase::Waiting).await;
        round += 1;

        let interval = Duration::from_secs(deps.config.agent.interval_secs);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.changed() => {}
        }
        if *cancel.borrow() {
            break;
        }
    }

    set_phase(&state, &deps.bus, RunPhase::Idle).await;
    info!("activation loop exited");
}

/// One full round: broadcast start, build context, run the tool loop,
/// persist through the memory pipeline, broadcast completion.
async fn run_round(
    deps: &Arc<SchedulerDeps>,
    state: &Arc<StdMutex<RunState>>,
    round: u64,
    cancel: &watch::Receiver<bool>,
) -> Result<(), MemoryError> {
    deps.bus
        .send(EventKind::Round, json!({ "phase": "started", "round": round }))
        .await;

    let outcome = execute_round(deps, round, cancel).await?;

    {
        let mut st = state.lock().unwrap();
        st.total_rounds += 1;
        st.last_round_tools = outcome.tools_used;
        st.last_round_summary = outcome.final_output;
    }
    deps.bus
        .send(
            EventKind::Round,
            json!({
                "phase": "completed",
                "round": round,
                "tools_used": outcome.tools_used,
                "duration": outcome.duration,
            }),
        )
        .await;
    Ok(())
}

async fn execute_round(
    deps: &Arc<SchedulerDeps>,
    round: u64,
    cancel: &watch::Receiver<bool>,
) -> Result<RoundOutcome, MemoryError> {
    let cfg = &deps.config;
    let started = Instant::now();

    // Context: one-shot inspiration, current snapshot, recent history.
    let inspiration = deps.memory.inspiration.take();
    let snapshot_markdown = deps.memory.load_snapshot().render_markdown();
    let history = deps.memory.timeline.recent(cfg.agent.history_rounds);

    // Fresh executor bound to this round's config.
    let stealth = Arc::new(Stealth::new(
        &deps.project_dir,
        std::process::id(),
        &deps.host,
        Some(cfg.web.port),
    ));
    let flags = ToolFlags {
        shell: cfg.tools.shell,
        files: cfg.tools.files,
        edit: cfg.tools.edit,
        skills: cfg.tools.skills,
        community: cfg.tools.community,
    };
    let community = cfg
        .community
        .as_ref()
        .map(|c| (c.server_url.clone(), c.api_key.clone()));
    let registry = standard_registry(
        PathBuf::from(&cfg.agent.home),
        cfg.agent.shell_timeout_secs,
        cfg.agent.max_output_chars,
        stealth,
        flags,
        deps.skills.clone(),
        community,
    );

    let persona = deps.persona.load(&cfg.agent.persona);
    let tools_doc = registry.render_docs();
    let skills_list = deps
        .skills
        .as_ref()
        .map(|s| s.list())
        .unwrap_or_default();

    let messages = assemble_messages(&ContextInputs {
        persona: &persona,
        tools_doc: &tools_doc,
        skills: &skills_list,
        snapshot_markdown: &snapshot_markdown,
        history: &history,
        inspiration: inspiration.as_deref(),
        round,
        tool_budget: cfg.agent.max_tool_calls,
        agent_home: &cfg.agent.home,
    });

    let tool_loop = ToolLoop {
        model: deps.model.as_ref(),
        tools: &registry,
        bus: &deps.bus,
        normal_limit: cfg.agent.max_tool_calls,
        temperature: cfg.agent.temperature,
    };
    let (result, _messages) = tool_loop.run(messages, cancel).await;

    if let Some(e) = &result.error {
        // The round still ends normally; the next one proceeds.
        warn!(round, error = %e, "round ended early");
        deps.bus
            .send(
                EventKind::Log,
                json!({ "message": format!("round {round} ended early: {e}") }),
            )
            .await;
    }

    let duration = (started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
    let entry = TimelineEntry {
        round,
        timestamp_utc: Utc::now(),
        tools_used: result.tools_used,
        duration_seconds: duration,
        summary: result.summary.clone(),
        action_log: result.action_log.clone(),
    };
    let final_output = final_output_of(&result.summary).to_string();
    deps.memory.finish_round(&entry, &final_output).await?;

    Ok(RoundOutcome {
        tools_used: result.tools_used,
        duration,
        final_output,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::FsPersonaProvider;
    use vigil_model::mock::MockProvider;
    use vigil_model::ResponseEvent;

    fn delta_turn(yaml: &str) -> Vec<ResponseEvent> {
        vec![ResponseEvent::TextDelta(yaml.to_string()), ResponseEvent::Done]
    }

    fn quiet_delta() -> Vec<ResponseEvent> {
        delta_turn("no_changes: true\nactivity: {content: quiet round}\n")
    }

    /// A scheduler whose mock model plays the given turns.  The mock is
    /// returned too so tests can inspect the requests it saw.
    fn scheduler_with(
        dir: &std::path::Path,
        turns: Vec<Vec<ResponseEvent>>,
    ) -> (Scheduler, Arc<MockProvider>) {
        let mock = Arc::new(MockProvider::new(turns));
        let model: Arc<MockProvider> = Arc::clone(&mock);
        let mut config = Config::default();
        config.agent.data_dir = dir.join("data").to_string_lossy().into_owned();
        config.agent.home = dir.join("home").to_string_lossy().into_owned();
        config.agent.interval_secs = 3600;
        std::fs::create_dir_all(dir.join("home")).unwrap();
        std::fs::create_dir_all(dir.join("project")).unwrap();
        let memory = MemoryPipeline::new(dir.join("data"), None, model.clone());
        let scheduler = Scheduler::new(SchedulerDeps {
            config,
            model,
            memory,
            bus: Arc::new(Broadcaster::new()),
            persona: Arc::new(FsPersonaProvider::new(None)),
            skills: None,
            project_dir: dir.join("project"),
            host: HostSession::default(),
        });
        (scheduler, mock)
    }

    #[tokio::test]
    async fn run_once_completes_a_round_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _mock) = scheduler_with(
            dir.path(),
            vec![MockProvider::text_turn("a calm first round"), quiet_delta()],
        );
        sched.run_once().await.unwrap();
        let st = sched.status();
        assert_eq!(st.state, RunPhase::Idle);
        assert_eq!(st.total_rounds, 1);
        assert_eq!(st.current_round, 1);
        assert!(st.last_round_summary.contains("a calm first round"));
        assert_eq!(sched.deps.memory.timeline.last_round(), 1);
    }

    #[tokio::test]
    async fn round_counter_resumes_from_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _mock) = scheduler_with(
            dir.path(),
            vec![MockProvider::text_turn("back again"), quiet_delta()],
        );
        // A prior life ended at round 42.
        sched
            .deps
            .memory
            .timeline
            .append(&TimelineEntry {
                round: 42,
                timestamp_utc: Utc::now(),
                tools_used: 0,
                duration_seconds: 1.0,
                summary: "[09:00:00] old work".into(),
                action_log: String::new(),
            })
            .unwrap();

        // Startup resolution reads; it does not write.
        let timeline_dir = dir.path().join("data/timeline");
        let files_before = std::fs::read_dir(&timeline_dir).unwrap().count();
        assert_eq!(sched.next_round(), 43);
        let files_after = std::fs::read_dir(&timeline_dir).unwrap().count();
        assert_eq!(files_before, files_after);
        assert!(!dir.path().join("data/snapshot.yaml").exists());

        sched.run_once().await.unwrap();
        assert_eq!(sched.status().current_round, 43);
        assert_eq!(sched.deps.memory.timeline.last_round(), 43);
    }

    #[tokio::test]
    async fn start_twice_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _mock) = scheduler_with(
            dir.path(),
            vec![MockProvider::text_turn("hello"), quiet_delta()],
        );
        sched.start().await.unwrap();
        let second = sched.start().await;
        assert!(matches!(second, Err(SchedulerError::AlreadyRunning)));
        sched.stop().await;
    }

    #[tokio::test]
    async fn start_run_stop_reaches_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _mock) = scheduler_with(
            dir.path(),
            vec![MockProvider::text_turn("one round"), quiet_delta()],
        );
        sched.start().await.unwrap();

        // Wait for the round to finish (interval is long, so the worker
        // parks in Waiting).
        for _ in 0..200 {
            if sched.status().total_rounds >= 1 && sched.status().state == RunPhase::Waiting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sched.status().total_rounds, 1);

        sched.stop().await;
        for _ in 0..200 {
            if sched.status().state == RunPhase::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sched.status().state, RunPhase::Idle);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (sched, _mock) = scheduler_with(dir.path(), vec![]);
        sched.stop().await;
        assert_eq!(sched.status().state, RunPhase::Idle);
    }

    #[tokio::test]
    async fn fatal_snapshot_failure_sets_error_phase() {
        let dir = tempfile::tempdir().unwrap();
        // Tool loop turn succeeds; both audit attempts come back empty.
        let (sched, _mock) = scheduler_with(
            dir.path(),
            vec![
                MockProvider::text_turn("worked"),
                vec![ResponseEvent::Done],
            ],
        );
        let err = sched.run_once().await.unwrap_err();
        assert!(matches!(err, MemoryError::SnapshotUpdate(_)));
        assert_eq!(sched.status().state, RunPhase::Error);
    }

    #[tokio::test]
    async fn inspiration_reaches_the_next_round_once() {
        let dir = tempfile::tempdir().unwrap();
        let model_turns = vec![
            MockProvider::text_turn("noted"),
            quiet_delta(),
            MockProvider::text_turn("second"),
            quiet_delta(),
        ];
        let (sched, mock) = scheduler_with(dir.path(), model_turns);
        sched.inspire("have a look at the garden").unwrap();
        sched.run_once().await.unwrap();

        {
            let reqs = mock.requests.lock().unwrap();
            let had_inspiration = reqs[0]
                .messages
                .iter()
                .any(|m| m.content.contains("have a look at the garden"));
            assert!(had_inspiration, "inspiration message must be present");
        }

        sched.run_once().await.unwrap();
        let reqs = mock.requests.lock().unwrap();
        let second_round_req = &reqs[2];
        assert!(
            !second_round_req
                .messages
                .iter()
                .any(|m| m.content.contains("have a look at the garden")),
            "inspiration is one-shot"
        );
    }

    #[tokio::test]
    async fn model_error_is_not_fatal_to_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        // No scripted turns: complete() returns Done-only, the tool loop
        // ends with an empty summary, and the audit still succeeds.
        let (sched, _mock) = scheduler_with(dir.path(), vec![vec![ResponseEvent::Done], quiet_delta()]);
        sched.run_once().await.unwrap();
        assert_eq!(sched.status().state, RunPhase::Idle);
        assert_eq!(sched.deps.memory.timeline.last_round(), 1);
    }
}
