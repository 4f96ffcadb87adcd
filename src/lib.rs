// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! # siteflow - Build-Task Orchestrator
//!
//! `siteflow` composes build steps into pipelines, re-runs them when
//! watched sources change and tells preview clients to reload.
//!
//! ## Features
//!
//! - **Composable pipelines** - `sequential` and `parallel` combinators over pluggable steps
//! - **Single-flight cache** - Content-keyed artifacts, computed at most once at a time
//! - **Debounced watching** - Bursts of changes become one run per rule
//! - **Live reload** - Reload messages pushed to connected previews after successful runs
//!
//! ## Quick Start
//!
//! ```bash
//! # List tasks
//! siteflow
//!
//! # Run the default sequence
//! siteflow run
//!
//! # Build, watch and live-reload
//! siteflow serve
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod steps;
pub mod tasks;
pub mod utils;
pub mod watch;

// Re-export commonly used types
pub use errors::{FlowError, FlowResult};
pub use orchestrator::{Orchestrator, RunReport};
pub use pipeline::{parallel, sequential, Pipeline};
pub use steps::{ShellStep, Step};
pub use tasks::{Task, TaskRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
