// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Serve command - build, watch and live-reload

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{build_orchestrator, load_project};
use crate::notifier::{Notifier, ReloadServer};
use crate::orchestrator::{ServeOptions, ServeState};
use crate::utils::{print_header, print_info};
use crate::watch::EventSource;

/// Run the serve command
pub async fn run(
    file: PathBuf,
    port: Option<u16>,
    browser: Option<String>,
    no_initial: bool,
    verbose: bool,
) -> Result<()> {
    let project = load_project(&file)?;
    if project.watch_rules.is_empty() {
        return Err(miette::miette!(
            "Build file has no watch rules\n\n\
             Add a 'watch' section to {} to use serve.",
            file.display()
        ));
    }

    let root = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let notifier = Arc::new(Notifier::new(Duration::from_millis(
        project.serve.reload_delay_ms,
    )));
    let orchestrator = build_orchestrator(&project, false)?.with_notifier(Arc::clone(&notifier));

    let addr = format!("{}:{}", project.serve.host, port.unwrap_or(project.serve.port));
    let server = ReloadServer::bind(&addr, notifier).await?;

    let options = ServeOptions {
        rules: project.watch_rules.clone(),
        initial_tasks: if no_initial {
            Vec::new()
        } else {
            project.initial_tasks()
        },
        browser: browser.unwrap_or_else(|| project.serve.browser.clone()),
    };

    print_header(&format!("Serving {}", project.name));
    print_info(&format!("Reload server: {}", server.local_addr().to_string().cyan()));
    print_info(&format!("Preview client: {}", options.browser));
    if verbose {
        for rule in &options.rules {
            print_info(&format!(
                "{} → {} ({}ms)",
                rule.patterns().join(", "),
                rule.task().bold(),
                rule.debounce().as_millis()
            ));
        }
    }
    println!("Press {} to stop.", "Ctrl+C".cyan());
    println!();

    let session = orchestrator.serve(options, EventSource::filesystem(root))?;
    let mut state = session.state();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    ServeState::Running => println!("{}", "Building...".dimmed()),
                    ServeState::Watching => println!("{}", "Watching for changes".dimmed()),
                    ServeState::Stopped => break,
                    ServeState::Idle => {}
                }
            }
        }
    }

    let summary = session.stop().await;
    server.shutdown().await;
    let summary = summary?;

    println!();
    println!(
        "{} run(s), {} failed, {} reload(s) sent",
        summary.runs,
        summary.failed_runs,
        summary.reloads
    );

    Ok(())
}
