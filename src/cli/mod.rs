//! CLI front-end (A1, SPEC_FULL §2): a thin `clap`-derived command surface
//! that resolves a `Target` + `Plan` and delegates immediately into the
//! [`crate::engine::Engine`].

mod commands;
mod planfile;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;

pub use commands::run;

/// Deployment mode for `deploy`/`revert` `--mode` (spec.md §4.9).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum DeployMode {
    All,
    Change,
    Tag,
}

impl From<DeployMode> for crate::reconciler::Mode {
    fn from(mode: DeployMode) -> Self {
        match mode {
            DeployMode::All => Self::All,
            DeployMode::Change => Self::Change,
            DeployMode::Tag => Self::Tag,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "dbdeploy", version, about = "Reconcile a plan of deploy/revert/verify changes against a target database")]
pub struct Cli {
    /// `db:<tag>:<uri>` connection string (SPEC_FULL §6 Target URI grammar).
    #[arg(short = 't', long, env = "DBDEPLOY_TARGET", global = true)]
    pub target: Option<String>,

    /// A name recorded alongside the target (informational).
    #[arg(long, default_value = "default", global = true)]
    pub target_name: String,

    /// Plan file in the minimal newline-delimited demo format (SPEC_FULL §2
    /// A3); deploy/revert/verify script directories resolve relative to its
    /// parent directory.
    #[arg(long, default_value = "dbdeploy.plan", global = true)]
    pub plan_file: PathBuf,

    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit errors as structured JSON instead of a human-readable line.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply pending changes up to `--to`/`--mode` (spec.md §4.8, §4.9).
    Deploy {
        #[arg(long)]
        to: Option<String>,
        #[arg(long, value_enum, default_value = "all")]
        mode: DeployMode,
    },
    /// Undo deployed changes, newest first, down to `--to` (spec.md §4.8,
    /// §4.9).
    Revert {
        #[arg(long)]
        to: Option<String>,
    },
    /// Run verify scripts; with no argument, verifies every deployed change
    /// (spec.md §4.8).
    Verify {
        change: Option<String>,
    },
    /// Print the most recently deployed change (spec.md §4.10
    /// `current_state`).
    Status,
    /// Search the `events` audit log (spec.md §4.10 `search_events`).
    Log {
        #[arg(long = "event")]
        events: Vec<String>,
        #[arg(long)]
        change: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = "desc")]
        direction: String,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show one change's current registry row, if deployed.
    Show {
        change: String,
    },
    /// Attach a tag to a deployed change — the most recently deployed one
    /// if `change` is omitted (spec.md §6 CLI surface; SPEC_FULL §2 A3
    /// notes plan-file tag-line syntax is out of scope, so this acts
    /// directly on the registry).
    Tag {
        name: String,
        change: Option<String>,
    },
    /// Create the registry schema for the target without deploying anything
    /// (spec.md §4.6 C7).
    InitRegistry,
    /// Emit a shell completion script (SPEC_FULL ambient CLI tooling).
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}
