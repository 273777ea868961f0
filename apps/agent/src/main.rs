//! treesync agent entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let config = config::Config::load(&config_path)?;
    tracing::info!(
        name = %config.name,
        path = %config_path.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "starting treesync agent"
            );
            rt.block_on(app::run(config))?;
            tracing::info!("agent shut down cleanly");
        }
        Command::Once => rt.block_on(app::once(config))?,
        Command::Status => rt.block_on(app::status(config))?,
        Command::Requeue { job_id } => rt.block_on(app::requeue(config, &job_id))?,
        Command::Enqueue {
            repo,
            branch,
            manifest,
        } => rt.block_on(app::enqueue(config, repo, branch, &manifest))?,
    }

    Ok(())
}
