// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Supervised activation runtime for an autonomous LLM agent.
///
/// Without a subcommand, the activation loop starts and runs until
/// interrupted.  The management console attaches to the same process over
/// the broadcast bus; this binary is the headless core.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered ones).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Override the data directory from the config.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the agent home directory from the config.
    #[arg(long)]
    pub home: Option<String>,

    /// Run exactly one activation round, then exit.
    #[arg(long)]
    pub once: bool,

    /// Verbose logging (equivalent to RUST_LOG=debug).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit.
    ShowConfig,

    /// Leave a one-shot note for the agent's next wake-up.
    ///
    /// The note replaces any pending one and is consumed (read and deleted)
    /// at the start of the next round.
    Inspire {
        /// The message text.
        message: String,
    },
}
