// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Conduit CLI
//!
//! The `conduit` binary inspects and exercises interceptor pipelines.
//!
//! ## Commands
//!
//! - `conduit phases [--direction in|out]` - List the phase catalogs
//! - `conduit chain plan|run <MANIFEST>` - Sort or simulate a scripted chain
//! - `conduit config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use conduit::commands::{self, ChainCommand, ConfigCommand, DirectionArg};

/// Conduit - phase-ordered interceptor pipelines
#[derive(Parser)]
#[command(name = "conduit")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CONDUIT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CONDUIT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List phase catalogs
    #[command(name = "phases")]
    Phases {
        /// Only show one direction
        #[arg(long, value_enum)]
        direction: Option<DirectionArg>,
    },

    /// Plan or simulate interceptor chains
    #[command(name = "chain")]
    Chain {
        #[command(subcommand)]
        command: ChainCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Phases { direction }) => commands::phases::handle_command(direction, cli.config).await,
        Some(Commands::Chain { command }) => commands::chain::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
