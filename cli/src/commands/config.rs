// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use conduit_core::PipelineConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./conduit-config.yaml)
        #[arg(short, long, default_value = "./conduit-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CONDUIT_CONFIG_PATH: {}",
            std::env::var("CONDUIT_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./conduit-config.yaml");
        println!("  4. ~/.conduit/config.yaml");
        println!("  5. /etc/conduit/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    println!("{}", "Phases:".bold());
    let phases = config.phase_manager().context("Configured phase catalog is invalid")?;
    println!(
        "  Inbound: {} phases{}",
        phases.inbound().len(),
        if config.spec.phases.inbound.is_some() { " (custom)" } else { "" }
    );
    println!(
        "  Outbound: {} phases{}",
        phases.outbound().len(),
        if config.spec.phases.outbound.is_some() { " (custom)" } else { "" }
    );
    println!();

    println!("{}", "Chain behaviour:".bold());
    println!(
        "  Unwind faulting interceptor: {}",
        config.spec.unwind.include_faulting_interceptor
    );
    println!(
        "  Sort cache: {}",
        if config.spec.cache.enabled {
            format!("enabled (max {} entries)", config.spec.cache.max_entries)
        } else {
            "disabled".to_string()
        }
    );
    println!("  Event buffer: {}", config.spec.events.capacity);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PipelineConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml").to_string()
    } else {
        serde_yaml::to_string(&PipelineConfig::default()).context("Failed to render default configuration")?
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
