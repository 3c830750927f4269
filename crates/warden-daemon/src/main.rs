//! # warden-daemon
//!
//! Runs the Warden session daemon in the foreground.
//!
//! ```text
//! warden-daemon /run/user/1000/warden.sock ~/.local/state/warden
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use warden_daemon::{Daemon, DaemonConfig};

/// Warden session daemon.
#[derive(Parser)]
#[command(name = "warden-daemon", about = "Warden session daemon", version)]
struct Cli {
    /// Path of the Unix socket to listen on.
    socket_path: PathBuf,

    /// State directory (created if missing).
    state_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the listening banner.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("warden_daemon=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let daemon = Daemon::bind(DaemonConfig::new(&cli.socket_path, &cli.state_dir))?;
    println!(
        "Listening on {:?} {}",
        cli.socket_path.display().to_string(),
        chrono::Utc::now().to_rfc3339()
    );

    daemon
        .run()
        .await
        .inspect_err(|e| tracing::error!("daemon error: {}", e))?;

    tracing::info!("daemon exiting");
    Ok(())
}
