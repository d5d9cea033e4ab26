use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};

/// In-process job scheduler host.
#[derive(Debug, Parser)]
#[command(name = "cadence", version, about)]
pub struct Cli {
    /// Path to cadence.toml (default: ~/.cadence/cadence.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print upcoming occurrences of a schedule without creating a job.
    Next(NextArgs),
    /// Run the scheduler, logging each due job until Ctrl-C.
    Run(RunArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("schedule").required(true).args(["cron", "every", "at"])))]
pub struct NextArgs {
    /// 5-field cron expression, e.g. "0 9 * * 1-5".
    #[arg(long)]
    pub cron: Option<String>,

    /// Fixed interval in milliseconds.
    #[arg(long)]
    pub every: Option<i64>,

    /// Grid anchor for --every, epoch milliseconds.
    #[arg(long, requires = "every")]
    pub anchor: Option<i64>,

    /// One-shot ISO-8601 instant.
    #[arg(long)]
    pub at: Option<String>,

    /// Reference instant (ISO-8601); defaults to now.
    #[arg(long)]
    pub after: Option<String>,

    /// How many occurrences to print.
    #[arg(long, default_value_t = 5)]
    pub count: usize,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON array of jobs to create on startup.
    #[arg(long)]
    pub jobs: Option<PathBuf>,

    /// Write the job list here on shutdown, in the same format as --jobs.
    #[arg(long)]
    pub snapshot_out: Option<PathBuf>,
}
