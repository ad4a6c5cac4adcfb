// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use vigil_channels::{Broadcaster, Envelope};
use vigil_config::Config;
use vigil_core::{ensure_wakeup_note, FsPersonaProvider, RunPhase, Scheduler, SchedulerDeps};
use vigil_memory::{InspirationStore, MemoryPipeline};
use vigil_model::{from_model_ref, ModelProvider};
use vigil_tools::{stealth::sanitized_environment, FsSkillProvider, HostSession, SkillProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = vigil_config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.agent.data_dir = data_dir.to_string_lossy().into_owned();
    }
    if let Some(home) = &cli.home {
        config.agent.home = home.clone();
    }

    match &cli.command {
        Some(Commands::ShowConfig) => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Some(Commands::Inspire { message }) => {
            let path = PathBuf::from(&config.agent.data_dir).join("inspiration.txt");
            InspirationStore::new(path).write(message)?;
            println!("noted — the agent will see it next round");
            Ok(())
        }
        None => run(config, cli.once).await,
    }
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let model = from_model_ref(&config.agent.model)
        .with_context(|| format!("building model provider for {}", config.agent.model))?;
    let auditor: Option<Arc<dyn ModelProvider>> = match &config.agent.snapshot_model {
        Some(model_ref) => Some(
            from_model_ref(model_ref)
                .with_context(|| format!("building audit model provider for {model_ref}"))?,
        ),
        None => None,
    };

    let data_dir = PathBuf::from(&config.agent.data_dir);
    let memory = MemoryPipeline::new(data_dir.clone(), auditor, Arc::clone(&model));

    // The runtime's installation directory is what the stealth layer hides.
    let project_dir = std::env::current_dir().context("resolving project directory")?;
    let host = HostSession::detect();

    let persona = Arc::new(FsPersonaProvider::new(Some(
        config
            .agent
            .prompts_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| project_dir.join("prompts")),
    )));

    let skills: Option<Arc<dyn SkillProvider>> = config.agent.skills_dir.as_ref().map(|dir| {
        Arc::new(FsSkillProvider::new(
            PathBuf::from(dir),
            sanitized_environment(),
            config.agent.shell_timeout_secs,
        )) as Arc<dyn SkillProvider>
    });

    if let Err(e) = ensure_wakeup_note(Path::new(&config.agent.home)) {
        warn!(home = %config.agent.home, error = %e, "could not place the wake-up note");
    }

    let bus = Arc::new(Broadcaster::new());
    spawn_round_logger(Arc::clone(&bus), data_dir.join("logs"));

    let scheduler = Scheduler::new(SchedulerDeps {
        config,
        model,
        memory,
        bus,
        persona,
        skills,
        project_dir,
        host,
    });

    if once {
        scheduler.run_once().await?;
        return Ok(());
    }

    scheduler.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping after the current round");
    scheduler.stop().await;

    // Bounded wait for the worker's clean exit.
    for _ in 0..1200 {
        if matches!(scheduler.status().state, RunPhase::Idle | RunPhase::Error) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Mirror bus events into the per-day human log, one file per UTC day with
/// a separator header per round.  High-frequency deltas are skipped.
fn spawn_round_logger(bus: Arc<Broadcaster>, log_dir: PathBuf) {
    let (_id, mut rx) = bus.subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Some(line) = render_log_line(&envelope) {
                if let Err(e) = append_log_line(&log_dir, &line) {
                    warn!(error = %e, "round log write failed");
                }
            }
        }
    });
}

fn render_log_line(envelope: &Envelope) -> Option<String> {
    match envelope.kind {
        "round" => {
            let round = envelope.data.get("round").and_then(|v| v.as_u64())?;
            match envelope.data.get("phase").and_then(|v| v.as_str()) {
                Some("started") => Some(format!(
                    "{sep}\nRound {round} | {ts}\n{sep}",
                    sep = "=".repeat(50),
                    ts = envelope.timestamp,
                )),
                Some("completed") => {
                    let tools = envelope.data.get("tools_used").and_then(|v| v.as_u64());
                    let duration = envelope.data.get("duration").and_then(|v| v.as_f64());
                    Some(format!(
                        "round {round} completed | tools: {} | {}s",
                        tools.unwrap_or(0),
                        duration.unwrap_or(0.0),
                    ))
                }
                _ => None,
            }
        }
        "status" => envelope
            .data
            .get("state")
            .and_then(|v| v.as_str())
            .map(|s| format!("status: {s}")),
        "log" => envelope
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        "tool_call" => envelope
            .data
            .get("name")
            .and_then(|v| v.as_str())
            .map(|n| format!("tool call: {n}")),
        "tool_result" => {
            let name = envelope.data.get("name").and_then(|v| v.as_str())?;
            let result = envelope.data.get("result").and_then(|v| v.as_str())?;
            let first_line = result.lines().next().unwrap_or("");
            Some(format!("tool result ({name}): {first_line}"))
        }
        _ => None,
    }
}

fn append_log_line(log_dir: &Path, line: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(log_dir)?;
    let file = log_dir.join(format!("{}.log", chrono::Utc::now().format("%Y-%m-%d")));
    let mut f = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(file)?;
    writeln!(f, "{line}")
}
