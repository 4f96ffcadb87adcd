// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Error types
//!
//! Configuration problems surface before any run starts; step failures are
//! carried as values so they can be reported per task and per step.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for siteflow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Main error type for siteflow
#[derive(Error, Debug, Diagnostic)]
pub enum FlowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Task '{name}' is already registered")]
    #[diagnostic(
        code(siteflow::duplicate_task),
        help("Task names must be unique; rename one of the '{name}' tasks")
    )]
    DuplicateTask { name: String },

    #[error("Step '{name}' is defined more than once")]
    #[diagnostic(code(siteflow::duplicate_step))]
    DuplicateStep { name: String },

    #[error("Circular task reference: {}", tasks.join(" → "))]
    #[diagnostic(
        code(siteflow::circular_dependency),
        help("A task cannot contain itself, directly or through other tasks")
    )]
    CircularDependency { tasks: Vec<String> },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    #[diagnostic(code(siteflow::invalid_glob))]
    InvalidGlob { pattern: String, message: String },

    #[error("Task '{task}' uses unknown step '{step}'")]
    #[diagnostic(
        code(siteflow::unknown_step),
        help("Check that '{step}' is defined under 'steps'")
    )]
    UnknownStep { task: String, step: String },

    #[error("Task '{task}' references unknown task '{reference}'")]
    #[diagnostic(code(siteflow::unknown_task_reference))]
    UnknownTaskReference { task: String, reference: String },

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(siteflow::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Build file not found: {path}")]
    #[diagnostic(
        code(siteflow::build_file_not_found),
        help("Create a .siteflow.yaml in the project root or pass one with --file")
    )]
    BuildFileNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────────
    // Invocation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(siteflow::task_not_found),
        help("Run 'siteflow list' to see the available tasks")
    )]
    TaskNotFound { name: String },

    #[error("Task '{task}' failed in step(s): {}", steps.join(", "))]
    #[diagnostic(code(siteflow::task_failed))]
    TaskFailed { task: String, steps: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Step Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Step '{step}' exited with code {exit_code}")]
    #[diagnostic(code(siteflow::step_failed))]
    StepFailed {
        step: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Tool '{tool}' execution failed: {error}")]
    #[diagnostic(code(siteflow::tool_execution_failed))]
    ToolExecutionFailed {
        tool: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Watch / Server Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cannot watch '{path}': {message}")]
    #[diagnostic(code(siteflow::watch_io))]
    WatchIo { path: PathBuf, message: String },

    #[error("File watcher error: {message}")]
    #[diagnostic(code(siteflow::watch_error))]
    Watch { message: String },

    #[error("Reload server error: {message}")]
    #[diagnostic(code(siteflow::server_error))]
    Server { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(siteflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(siteflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(siteflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(siteflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(siteflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for FlowError {
    fn from(e: glob::PatternError) -> Self {
        Self::InvalidGlob {
            pattern: String::new(),
            message: e.to_string(),
        }
    }
}

impl FlowError {
    /// Build an invalid glob error that remembers the offending pattern
    pub fn invalid_glob(pattern: &str, err: glob::PatternError) -> Self {
        Self::InvalidGlob {
            pattern: pattern.to_string(),
            message: err.msg.to_string(),
        }
    }

    /// Whether this error belongs to the configuration class (fatal at startup)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateTask { .. }
                | Self::DuplicateStep { .. }
                | Self::CircularDependency { .. }
                | Self::InvalidGlob { .. }
                | Self::UnknownStep { .. }
                | Self::UnknownTaskReference { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// Short failure description, including captured stderr for step failures
    pub fn failure_cause(&self) -> String {
        match self {
            Self::StepFailed { exit_code, stderr, .. } if !stderr.trim().is_empty() => {
                format!("exit code {}: {}", exit_code, stderr.trim())
            }
            Self::StepFailed { exit_code, .. } => format!("exit code {}", exit_code),
            other => other.to_string(),
        }
    }
}
