//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "treesync-agent",
    version,
    about = "Background uploader for staged repository changes"
)]
pub struct Cli {
    /// Configuration file (defaults to the per-user agent.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Dispatch the queue on a fixed interval until interrupted (default)
    Run,
    /// Run a single dispatch cycle and exit
    Once,
    /// List queued jobs
    Status,
    /// Give a job held at the retry ceiling a fresh set of attempts
    Requeue {
        /// Job id as shown by `status`
        job_id: String,
    },
    /// Queue one job from a manifest of relative path to upload target
    Enqueue {
        /// Absolute path of the repository the files belong to
        #[arg(long)]
        repo: PathBuf,
        #[arg(long)]
        branch: String,
        /// JSON object mapping each relative path to its target or null
        #[arg(long)]
        manifest: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["treesync-agent"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn global_config_flag() {
        let cli =
            Cli::try_parse_from(["treesync-agent", "status", "--config", "/etc/ts.toml"]).unwrap();
        assert_eq!(cli.command, Some(Command::Status));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ts.toml")));
    }

    #[test]
    fn enqueue_requires_all_arguments() {
        assert!(Cli::try_parse_from(["treesync-agent", "enqueue", "--repo", "/r"]).is_err());

        let cli = Cli::try_parse_from([
            "treesync-agent",
            "enqueue",
            "--repo",
            "/work/site",
            "--branch",
            "main",
            "--manifest",
            "batch.json",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Enqueue {
                repo: "/work/site".into(),
                branch: "main".into(),
                manifest: "batch.json".into(),
            })
        );
    }
}
