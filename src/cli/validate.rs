// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Validate command - check the build file

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::{BuildFile, ConfigValidator};

/// Run the validate command
pub async fn run(file: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating build file...".bold());
    println!();

    let build_file = match BuildFile::from_file(&file) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("  {} Failed to parse build file", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Build file parses", "✓".green());

    let validation = ConfigValidator::validate(&build_file);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Build file summary".bold());
        println!("  Name: {}", build_file.name);
        println!("  Steps: {}", build_file.steps.len());
        for step in &build_file.steps {
            let cached = if step.cacheable { " [cacheable]" } else { "" };
            println!("    - {} ({}){}", step.name, step.shell, cached.dimmed());
        }
        println!("  Tasks: {}", build_file.tasks.len());
        println!("  Watch rules: {}", build_file.watch.len());
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Build file validation failed"));
    }

    if validation.has_warnings() {
        println!("{}", "Build file is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Build file is valid!".green().bold());
    }
    Ok(())
}
