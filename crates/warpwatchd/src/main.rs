//! warpwatchd — the warpwatch daemon.
//!
//! Loads a TOML service list, polls every service on its own interval and
//! sends rate-limited alerts when checks fail.
//!
//! # Usage
//!
//! ```text
//! warpwatchd run --config warpwatch.toml
//! warpwatchd run --config warpwatch.toml --duration 300 --log-format json
//! warpwatchd validate --config warpwatch.toml
//! warpwatchd init --output warpwatch.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_FILTER: &str = "info,warpwatchd=debug,warpwatch_health=debug,warpwatch_core=debug";

#[derive(Parser)]
#[command(
    name = "warpwatchd",
    about = "warpwatch daemon — service reachability monitor",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the configured services until Ctrl-C or `--duration` elapses.
    Run {
        /// Path to the TOML config file.
        #[arg(short, long, default_value = "warpwatch.toml")]
        config: PathBuf,

        /// Stop after this many seconds (0 = run until Ctrl-C).
        #[arg(short, long, default_value = "0")]
        duration: u64,
    },
    /// Load and resolve a config file, then print the service table.
    Validate {
        #[arg(short, long, default_value = "warpwatch.toml")]
        config: PathBuf,
    },
    /// Write a starter config file.
    Init {
        #[arg(short, long, default_value = "warpwatch.toml")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Run { config, duration } => commands::run::run(&config, duration).await,
        Command::Validate { config } => commands::validate::validate(&config),
        Command::Init { output, force } => commands::init::init(&output, force),
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
