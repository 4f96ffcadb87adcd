// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Run command - execute tasks in order

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{build_orchestrator, load_project};
use crate::orchestrator::RunReport;
use crate::steps::Step;
use crate::utils::{print_error, print_success, print_warning};

/// Run the run command
pub async fn run(file: PathBuf, tasks: Vec<String>, no_cache: bool, verbose: bool) -> Result<()> {
    let project = load_project(&file)?;

    let names = if tasks.is_empty() {
        project.default_sequence.clone()
    } else {
        tasks
    };
    if names.is_empty() {
        return Err(miette::miette!(
            "No task given and no default sequence configured\n\n\
             Run 'siteflow list' to see the available tasks."
        ));
    }

    for step in &project.steps {
        if !step.check_available() {
            print_warning(&format!(
                "Shell '{}' for step '{}' not found on PATH",
                step.shell(),
                step.name()
            ));
        }
    }

    let orchestrator = build_orchestrator(&project, no_cache)?;
    let report = orchestrator.run_sequence(&names).await?;

    for run in &report.runs {
        print_run(run, verbose);
    }
    for skipped in &report.skipped {
        println!("  {} {} {}", "-".dimmed(), skipped, "(skipped)".dimmed());
    }

    report.into_result()?;
    Ok(())
}

fn print_run(run: &RunReport, verbose: bool) {
    let secs = run.result.duration.as_secs_f64();

    if run.success() {
        print_success(&format!("{} ({:.2}s)", run.task.bold(), secs));
    } else {
        print_error(&format!("{} ({:.2}s)", run.task.bold(), secs));
        for failure in &run.result.failures {
            eprintln!("      {} {}", failure.step.red(), failure.cause.dimmed());
        }
    }

    if verbose {
        for record in &run.result.records {
            let source = if record.cache_hit { "cached" } else { "ran" };
            println!(
                "      {} {} {}",
                "·".dimmed(),
                record.step,
                format!("({}, {:.2}s)", source, record.output.duration.as_secs_f64()).dimmed()
            );
        }
    }
}
