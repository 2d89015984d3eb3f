//! CLI argument parsing and dispatch

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

/// Run CloudQuery syncs and commands inside a container, with incremental
/// state persisted across runs.
#[derive(Parser, Debug)]
#[command(name = "cqtask", version, about)]
pub struct Cli {
    /// Log format: text or json
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Emit a JSON result summary on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Root directory of the durable state store
    /// (default: $CQTASK_STATE_DIR or the platform temp dir)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, global = true, default_value = "docker")]
    pub runtime: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a CloudQuery sync from one or more configurations
    Sync(SyncArgs),
    /// Run CloudQuery commands directly
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Config source: a URI, a file path, or an inline YAML mapping.
    /// Repeatable; file order is preserved on the tool's command line.
    #[arg(long = "config", required = true)]
    pub configs: Vec<String>,

    /// Persist incremental cursor state across runs
    #[arg(long)]
    pub incremental: bool,

    /// Extra environment variable for the tool process (KEY=VALUE)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Container image (default: the published CloudQuery image)
    #[arg(long)]
    pub image: Option<String>,

    /// Docker network mode
    #[arg(long)]
    pub network: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Commands to run (after `--`)
    #[arg(required = true, trailing_var_arg = true)]
    pub commands: Vec<String>,

    /// Extra environment variable for the tool process (KEY=VALUE)
    #[arg(long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Container image (default: the published CloudQuery image)
    #[arg(long)]
    pub image: Option<String>,

    /// Docker network mode
    #[arg(long)]
    pub network: Option<String>,

    /// Wrap commands in `/bin/sh -c` with a `cloudquery` alias
    #[arg(long)]
    pub shell: bool,

    /// Prefix each command with the tool binary path
    #[arg(long, conflicts_with = "shell")]
    pub binary: bool,

    /// File to place in the workspace before the run (NAME=HOST_PATH)
    #[arg(long = "input-file", value_parser = parse_key_val)]
    pub input_files: Vec<(String, String)>,

    /// Workspace-relative file to collect after the run
    #[arg(long = "output-file")]
    pub output_files: Vec<String>,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: '{}'", s))
}

impl Cli {
    /// Dispatch to the selected command, returning the tool's exit code
    pub async fn dispatch(self) -> Result<i32> {
        let context = commands::CommandContext {
            json: self.json,
            state_dir: self.state_dir,
            runtime: self.runtime,
        };
        match self.command {
            Commands::Sync(args) => commands::sync::execute(args, context).await,
            Commands::Run(args) => commands::run::execute(args, context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync() {
        let cli = Cli::try_parse_from([
            "cqtask",
            "sync",
            "--config",
            "sources.yml",
            "--config",
            "destination.yml",
            "--incremental",
            "--env",
            "AWS_REGION=eu-west-1",
        ])
        .unwrap();

        match cli.command {
            Commands::Sync(args) => {
                assert_eq!(args.configs, vec!["sources.yml", "destination.yml"]);
                assert!(args.incremental);
                assert_eq!(
                    args.env,
                    vec![("AWS_REGION".to_string(), "eu-west-1".to_string())]
                );
            }
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_trailing_commands() {
        let cli = Cli::try_parse_from([
            "cqtask",
            "run",
            "--shell",
            "--",
            "cloudquery sync config.yml --log-console",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert!(args.shell);
                assert_eq!(
                    args.commands,
                    vec!["cloudquery sync config.yml --log-console"]
                );
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_requires_config() {
        assert!(Cli::try_parse_from(["cqtask", "sync"]).is_err());
    }

    #[test]
    fn test_shell_and_binary_conflict() {
        let result =
            Cli::try_parse_from(["cqtask", "run", "--shell", "--binary", "--", "sync a.yml"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_env_rejected() {
        let result = Cli::try_parse_from([
            "cqtask",
            "sync",
            "--config",
            "a.yml",
            "--env",
            "MISSING_EQUALS",
        ]);
        assert!(result.is_err());
    }
}
