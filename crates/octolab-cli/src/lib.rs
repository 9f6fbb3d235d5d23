//! octolab-cli: the operator-facing CLI. Talks to `octolab-lab` and
//! `octolab-runtime` directly — no HTTP hop, since the HTTP layer stays
//! out of this workspace's scope. Each command assembles its own short-
//! lived config/runtime/DB pool rather than sharing `octolabd`'s, since
//! this binary runs as a separate, occasional process.

pub mod commands;
pub mod ui;

use clap::{Parser, Subcommand, ValueEnum};

pub use commands::run;

#[derive(Parser)]
#[command(name = "octolab", version, about = "Operate the octolab lab orchestration core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RuntimeArg {
    Compose,
    Firecracker,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the doctor checks for the effective (or an overridden) runtime
    Doctor {
        /// Preview doctor checks for this runtime instead of the configured default
        #[arg(long)]
        runtime: Option<RuntimeArg>,
        #[arg(long)]
        json: bool,
    },
    /// Run the smoke test for the effective (or an overridden) runtime
    Smoke {
        #[arg(long)]
        runtime: Option<RuntimeArg>,
        #[arg(long)]
        json: bool,
    },
    /// Inspect labs stored in Postgres
    Lab {
        #[command(subcommand)]
        command: LabCommands,
    },
    /// Ensure the database schema exists and reconcile orphaned labs
    Bootstrap,
}

#[derive(Subcommand)]
pub enum LabCommands {
    /// List labs owned by a given owner (or all labs, with --admin)
    List {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        admin: bool,
    },
    /// Inspect one lab's stored record plus its live runtime status
    Inspect {
        lab_id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        admin: bool,
    },
}
