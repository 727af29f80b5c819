// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Phase catalog listing

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use std::path::PathBuf;

use conduit_core::{Direction, PhaseRegistry, PipelineConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DirectionArg {
    In,
    Out,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::In => Direction::Inbound,
            DirectionArg::Out => Direction::Outbound,
        }
    }
}

pub async fn handle_command(direction: Option<DirectionArg>, config_path: Option<PathBuf>) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let phases = config
        .phase_manager()
        .context("Configured phase catalog is invalid")?;

    let directions = match direction {
        Some(arg) => vec![Direction::from(arg)],
        None => vec![Direction::Inbound, Direction::Outbound],
    };

    for direction in directions {
        print_catalog(direction, phases.registry(direction));
    }
    Ok(())
}

fn print_catalog(direction: Direction, registry: &PhaseRegistry) {
    println!(
        "{} ({} phases)",
        format!("{} phases", direction).bold(),
        registry.len()
    );
    for phase in registry.all_phases() {
        println!("  {:>3}  {}", phase.ordinal, phase.name);
    }
    println!();
}
