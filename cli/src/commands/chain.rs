// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Chain planning and simulation commands
//!
//! Commands: plan, run

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use conduit_core::domain::events::ChainEvent;
use conduit_core::infrastructure::interceptors::LoggingFaultObserver;
use conduit_core::{ChainOutcome, Exchange, Leg, Message, PipelineConfig, PipelineRuntime};

use crate::manifest::{ChainManifest, Trace, TraceEntry};

#[derive(Subcommand)]
pub enum ChainCommand {
    /// Sort a manifest's interceptors and print the execution order
    Plan {
        /// Path to chain manifest YAML file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },

    /// Simulate a chain run over an empty message
    Run {
        /// Path to chain manifest YAML file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Mark the exchange one-way
        #[arg(long)]
        one_way: bool,

        /// Cancel the chain the first time it pauses instead of resuming it
        #[arg(long)]
        cancel_after_pause: bool,
    },
}

pub async fn handle_command(command: ChainCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = PipelineConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let runtime = Arc::new(
        PipelineRuntime::from_config(&config)
            .context("Invalid pipeline configuration")?
            .with_fault_observer(Arc::new(LoggingFaultObserver)),
    );

    match command {
        ChainCommand::Plan { manifest } => plan(runtime, manifest).await,
        ChainCommand::Run {
            manifest,
            one_way,
            cancel_after_pause,
        } => run(runtime, manifest, one_way, cancel_after_pause).await,
    }
}

async fn plan(runtime: Arc<PipelineRuntime>, manifest_path: PathBuf) -> Result<()> {
    let manifest = ChainManifest::from_yaml_file(&manifest_path)?;
    let trace = Trace::default();
    let set = manifest.provider(&trace);

    let chain = runtime
        .chain_factory()
        .build(manifest.leg, &[&set], &[])
        .with_context(|| format!("Cannot build chain from {:?}", manifest_path))?;

    println!("{}", chain.describe());
    println!("{}", "✓ Chain is valid".green());
    Ok(())
}

async fn run(
    runtime: Arc<PipelineRuntime>,
    manifest_path: PathBuf,
    one_way: bool,
    cancel_after_pause: bool,
) -> Result<()> {
    let manifest = ChainManifest::from_yaml_file(&manifest_path)?;
    let trace = Trace::default();
    let set = manifest.provider(&trace);

    let message = match manifest.leg {
        Leg::Outbound | Leg::OutFault => Message::requestor(),
        Leg::Inbound | Leg::InFault => Message::new(),
    };
    let exchange = if one_way {
        Exchange::one_way()
    } else {
        Exchange::new()
    };
    let exchange = exchange.with_message(manifest.leg, message);
    let mut events = runtime.events().subscribe_exchange(exchange.id);

    let continuation = runtime
        .chain_factory()
        .continuation(exchange, manifest.leg, &[&set], &[])
        .with_context(|| format!("Cannot build chain from {:?}", manifest_path))?;

    println!("Running {} chain from {}", manifest.leg.as_str(), manifest_path.display());
    let mut outcome = continuation.start().await?;
    while outcome == ChainOutcome::Paused {
        if cancel_after_pause {
            println!("{}", "  chain paused, cancelling".yellow());
            match continuation.cancel("cancelled after pause").await {
                Some(cancelled) => outcome = cancelled,
                None => debug!("Chain finished before cancellation"),
            }
            break;
        }
        println!("{}", "  chain paused, resuming".yellow());
        outcome = continuation.resume().await?;
    }

    println!();
    println!("{}", "Trace:".bold());
    for entry in trace.lock().iter() {
        match entry {
            TraceEntry::Invoked { id, phase } => println!("  → {} ({})", id, phase.dimmed()),
            TraceEntry::Unwound { id } => println!("  ← {} {}", id, "unwind".red()),
        }
    }

    println!();
    println!("{}", "Events:".bold());
    for event in events.drain() {
        println!("  {}", describe_event(&event));
    }

    println!();
    match &outcome {
        ChainOutcome::Complete => println!("{}", "✓ Chain complete".green()),
        ChainOutcome::Paused => println!("{}", "Chain left paused".yellow()),
        ChainOutcome::Aborted(fault) => println!("{}", format!("✗ Chain aborted: {}", fault).red()),
        ChainOutcome::AbortedOneWay => {
            let exchange = continuation.exchange().lock().await;
            let recorded = exchange
                .fault()
                .map(|fault| fault.to_string())
                .unwrap_or_default();
            println!(
                "{}",
                format!("✗ One-way chain aborted (not reported to caller): {}", recorded).yellow()
            );
        }
    }
    Ok(())
}

fn describe_event(event: &ChainEvent) -> String {
    match event {
        ChainEvent::ChainStarted { interceptor_count, .. } => {
            format!("started ({} interceptors)", interceptor_count)
        }
        ChainEvent::ChainPaused { interceptor, cursor, .. } => {
            format!("paused by {} (next position {})", interceptor, cursor)
        }
        ChainEvent::ChainResumed { cursor, .. } => format!("resumed at position {}", cursor),
        ChainEvent::InterceptorsInserted { by, inserted, skipped, .. } => {
            format!("{} inserted {:?}, skipped {:?}", by, inserted, skipped)
        }
        ChainEvent::ChainCompleted { invoked, .. } => format!("completed ({} invoked)", invoked),
        ChainEvent::ChainAborted { fault, unwound, one_way, .. } => format!(
            "aborted: {} (unwound {:?}{})",
            fault,
            unwound,
            if *one_way { ", one-way" } else { "" }
        ),
    }
}
