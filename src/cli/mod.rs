//! CLI command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod check;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use tgwa_relay::config::Config;

#[derive(Parser)]
#[command(name = "tgwa-relay")]
#[command(version)]
#[command(about = "Relay Telegram channel posts into a WhatsApp group", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay and run until Ctrl+C
    Run {
        /// Config file (defaults to ~/.tgwa-relay/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and print diagnostics
    Check {
        /// Config file (defaults to ~/.tgwa-relay/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

/// Config file the command should read.
pub(crate) fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(Config::path)
}

/// Load config from `path` with environment overrides applied.
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    Config::load_from_path(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // A missing .env is the normal case in production.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to read .env: {}", e);
        }
    }

    let cli = Cli::parse();

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Run { config }) => {
            run::cmd_run(config_path(config.as_deref())).await?;
        }
        Some(Commands::Check { config }) => {
            check::cmd_check(config_path(config.as_deref()))?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("tgwa-relay {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Relay Telegram channel posts into a WhatsApp group");
}
