//! Command implementations for the `changeset` binary.
//!
//! Each module contains the full implementation for one subcommand.

pub mod add;
pub mod get_version;
pub mod version_cmd;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use changesets_plugin::{HostConfig, PluginHost, VersionClient};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Record changes and release new versions.
#[derive(Parser, Debug)]
#[command(name = "changeset", version, about = "Record changes and release new versions")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for downloaded and compiled plugins (default: ~/.cache/changesets).
    #[arg(long, global = true, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a new change.
    Add(add::Args),
    /// Apply pending changes to the project version.
    #[command(alias = "consume")]
    Version(version_cmd::Args),
    /// Print the current project version.
    GetVersion,
}

/// The project a command operates on.
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory holding `.changeset/`.
    pub root: PathBuf,
    /// Plugin cache override.
    pub cache_dir: Option<PathBuf>,
}

impl Project {
    /// Connect to the version plugin named in the project configuration.
    pub fn version_client(&self) -> Result<VersionClient<PluginHost>> {
        let config = Config::load(&self.root)?;

        let mut host_config = HostConfig::new()?.with_working_dir(&self.root);
        if let Some(cache_dir) = &self.cache_dir {
            host_config = host_config.with_cache_root(cache_dir);
        }

        Ok(VersionClient::for_host(PluginHost::new(
            config.plugin,
            host_config,
        )))
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Run a parsed command line, writing user-facing output to `out`.
pub fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<ExitCode> {
    let project = Project {
        root: std::env::current_dir().context("failed to determine current directory")?,
        cache_dir: cli.cache_dir.clone(),
    };

    match &cli.command {
        Command::Add(args) => add::run(args, &project, out)?,
        Command::Version(args) => version_cmd::run(args, &project, out)?,
        Command::GetVersion => get_version::run(&project, out)?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Main entry point for the `changeset` binary.
pub fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut stdout = io::stdout().lock();
    match run(&cli, &mut stdout) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_consume_alias() {
        let cli = Cli::try_parse_from(["changeset", "consume", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Command::Version(ref args) if args.dry_run));
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["changeset", "get-version", "-v", "--cache-dir", "/tmp/c"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(cli.command, Command::GetVersion));
    }

    #[test]
    fn test_add_flags() {
        let cli = Cli::try_parse_from(["changeset", "add", "-t", "minor", "-m", "New flag"]).unwrap();
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.bump_type, Some(crate::version::BumpType::Minor));
        assert_eq!(args.message.as_deref(), Some("New flag"));

        assert!(Cli::try_parse_from(["changeset", "add", "-t", "huge"]).is_err());
    }
}
