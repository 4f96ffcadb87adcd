// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for siteflow.

pub mod graph;
pub mod list;
pub mod run;
pub mod serve;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use miette::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::config::{BuildFile, Project, DEFAULT_BUILD_FILE};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{ExecutionOptions, PipelineExecutor};

/// Build-task orchestrator
///
/// Run named build tasks, watch sources and live-reload a preview.
#[derive(Parser, Debug)]
#[clap(
    name = "siteflow",
    version,
    about = "Build-task orchestrator for static site assets",
    long_about = None,
    after_help = "Examples:\n\
        siteflow                        List the available tasks\n\
        siteflow run                    Run the default task sequence\n\
        siteflow run styles scripts     Run tasks in order\n\
        siteflow serve                  Build, watch and live-reload\n\n\
        See 'siteflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Build file
    #[clap(short, long, global = true, value_name = "FILE", default_value = DEFAULT_BUILD_FILE)]
    pub file: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run tasks in order (the default sequence when none are given)
    Run {
        /// Task names
        tasks: Vec<String>,

        /// Skip the artifact cache
        #[clap(long)]
        no_cache: bool,
    },

    /// Build, then watch sources and push reloads to preview clients
    Serve {
        /// Reload server port (overrides serve.port)
        #[clap(short, long)]
        port: Option<u16>,

        /// Preview client to open (overrides serve.browser)
        #[clap(short, long)]
        browser: Option<String>,

        /// Skip the initial run
        #[clap(long)]
        no_initial: bool,
    },

    /// List tasks
    List,

    /// Show how tasks embed each other
    Graph {
        /// Output format
        #[clap(short = 'F', long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// Validate the build file
    Validate,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load and compile the build file
pub fn load_project(path: &Path) -> Result<Project> {
    let file = BuildFile::from_file(path)?;
    Ok(file.compile()?)
}

/// Orchestrator for `project` rooted at the current directory
pub fn build_orchestrator(project: &Project, no_cache: bool) -> Result<Orchestrator> {
    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let mut executor =
        PipelineExecutor::new(working_dir).with_options(ExecutionOptions { no_cache });
    if project.cache_enabled && !no_cache {
        executor = executor.with_cache(Arc::new(CacheStore::new()));
    }

    Ok(Orchestrator::new(Arc::clone(&project.registry), executor))
}
