use std::sync::Arc;

use anyhow::Context;
use cadence_core::config::CadenceConfig;
use cadence_scheduler::{JobFilter, Scheduler};
use clap::Parser;
use tracing::{info, warn};

mod cli;
mod handler;
mod preview;
mod snapshot;

use cli::{Cli, Command, RunArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let loaded = CadenceConfig::load(config_path.as_deref());
    let filter = loaded
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| cadence_core::config::DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let config = loaded.unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    match cli.command {
        Command::Next(args) => preview::run(&args),
        Command::Run(args) => run(config, args).await,
    }
}

/// Host the engine until Ctrl-C, logging every due job.
async fn run(config: CadenceConfig, args: RunArgs) -> anyhow::Result<()> {
    let scheduler = Scheduler::new(config.scheduler);

    if let Some(path) = &args.jobs {
        let inputs = snapshot::load(path)
            .with_context(|| format!("loading job snapshot {}", path.display()))?;
        for input in inputs {
            scheduler.create(input);
        }
        info!(path = %path.display(), jobs = scheduler.status().jobs, "job snapshot restored");
    }

    let _subscription = scheduler.subscribe(Arc::new(handler::LogHandler));
    scheduler.start();

    let status = scheduler.status();
    info!(
        jobs = status.jobs,
        enabled = status.enabled_jobs,
        next_wake_at_ms = status.next_wake_at_ms,
        "waiting for due jobs (Ctrl-C to exit)"
    );

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    scheduler.stop();

    if let Some(path) = &args.snapshot_out {
        let jobs = scheduler.list(&JobFilter::default());
        snapshot::save(path, &jobs)
            .with_context(|| format!("writing job snapshot {}", path.display()))?;
        info!(path = %path.display(), jobs = jobs.len(), "job snapshot written");
    }
    Ok(())
}
