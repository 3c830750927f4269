//! # warden-cli
//!
//! Command-line interface for Warden confinement environments.
//!
//! - `warden eval` — run code in a freshly sealed environment
//! - `warden policy show` — print the effective policy and selected shims
//! - `warden audit` — list reachable binding paths and check them
//! - `warden serve` — run the session daemon in the foreground

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warden_policy::WardenConfig;

/// Warden: capability-confined evaluation.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Config file (defaults to <project-root>/.warden/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate code inside a sealed environment.
    Eval(commands::eval::EvalArgs),
    /// Inspect the effective capability policy.
    Policy {
        #[command(subcommand)]
        command: commands::policy::PolicyCommands,
    },
    /// Build an environment and audit its reachable bindings.
    Audit {
        /// Print every reachable path, not just the summary.
        #[arg(long)]
        paths: bool,
    },
    /// Run the session daemon in the foreground.
    Serve {
        /// Unix socket to listen on.
        #[arg(long)]
        socket: PathBuf,
        /// Daemon state directory.
        #[arg(long)]
        state: PathBuf,
    },
}

fn load_config(project_root: &Path, config: Option<&Path>) -> anyhow::Result<WardenConfig> {
    Ok(match config {
        Some(path) => WardenConfig::load(path)?,
        None => WardenConfig::for_project(project_root)?,
    })
}

fn main() -> anyhow::Result<()> {
    // Logs (including confined console output) go to stderr; stdout carries
    // results only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);

    let config = || load_config(&project_root, cli.config.as_deref());

    match &cli.command {
        Commands::Eval(args) => commands::eval::execute(args, &config()?),
        Commands::Policy { command } => commands::policy::execute(command, &config()?),
        Commands::Audit { paths } => commands::audit::execute(&config()?, *paths),
        Commands::Serve { socket, state } => commands::serve::execute(socket, state),
    }
}
