// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! List command - show the available tasks

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::load_project;
use crate::utils::print_section;

/// Run the list command
pub async fn run(file: PathBuf, verbose: bool) -> Result<()> {
    let project = load_project(&file)?;

    println!("{} {}", "Tasks in".bold(), project.name.bold());

    for task in project.registry.iter() {
        match &task.description {
            Some(description) => println!("  {:<16} {}", task.name.cyan(), description),
            None => println!("  {}", task.name.cyan()),
        }
        println!("  {:<16} {}", "", task.pipeline.to_string().dimmed());
    }

    if !project.default_sequence.is_empty() {
        print_section("Default");
        println!("  {}", project.default_sequence.join(" → "));
    }

    if !project.watch_rules.is_empty() {
        print_section("Watch");
        for rule in &project.watch_rules {
            println!(
                "  {} → {} {}",
                rule.patterns().join(", "),
                rule.task(),
                format!("({}ms)", rule.debounce().as_millis()).dimmed()
            );
        }
    }

    if verbose {
        print_section("Serve");
        let initial = project.initial_tasks();
        if initial.is_empty() {
            println!("  initial build: {}", "none".dimmed());
        } else {
            println!("  initial build: {}", initial.join(" → "));
        }
        println!(
            "  reload server: {}:{} ({}ms delay)",
            project.serve.host, project.serve.port, project.serve.reload_delay_ms
        );
    }

    Ok(())
}
