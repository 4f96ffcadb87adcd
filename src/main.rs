// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! siteflow - Build-Task Orchestrator
//!
//! Run site build tasks, watch sources and live-reload previews.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siteflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "siteflow=debug"
    } else {
        "siteflow=info"
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !siteflow::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        None | Some(Commands::List) => siteflow::cli::list::run(cli.file, cli.verbose).await,
        Some(Commands::Run { tasks, no_cache }) => {
            siteflow::cli::run::run(cli.file, tasks, no_cache, cli.verbose).await
        }
        Some(Commands::Serve {
            port,
            browser,
            no_initial,
        }) => siteflow::cli::serve::run(cli.file, port, browser, no_initial, cli.verbose).await,
        Some(Commands::Graph { format }) => {
            siteflow::cli::graph::run(cli.file, format, cli.verbose).await
        }
        Some(Commands::Validate) => siteflow::cli::validate::run(cli.file, cli.verbose).await,
    }
}
