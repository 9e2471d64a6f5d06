//! Parcelnet CLI - Command-line interface
//!
//! Runs deterministic and live simulations of the tracking network.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use parcelnet_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "parcelnet")]
#[command(about = "Distributed package tracking simulation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the per-run log file
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(cli.log_level.as_tracing_level(), Some(&cli.logs_dir))?;
    tracing::debug!(log_file = %log_file.display(), "Logging initialized");

    commands::handle_command(cli.command).await
}
