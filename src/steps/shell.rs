// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Shell step
//!
//! Runs an external transform through a shell command.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

use super::{Step, StepContext, StepOutput};
use crate::errors::{FlowError, FlowResult};

/// Environment variable carrying the resolved input paths, one per line
pub const INPUTS_ENV: &str = "SITEFLOW_INPUTS";

/// Environment variable carrying the running step's name
pub const STEP_ENV: &str = "SITEFLOW_STEP";

/// A step backed by a shell command
#[derive(Debug, Clone)]
pub struct ShellStep {
    name: String,
    command: String,
    shell: String,
    inputs: Vec<String>,
    outputs: Vec<PathBuf>,
    env: HashMap<String, String>,
    cacheable: bool,
    options: Option<serde_json::Value>,
}

impl ShellStep {
    /// Create a shell step running `command` with bash
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            shell: "bash".to_string(),
            inputs: vec![],
            outputs: vec![],
            env: HashMap::new(),
            cacheable: false,
            options: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_options(mut self, options: Option<serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    /// The command line this step runs
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Check that the configured shell can be found
    pub fn check_available(&self) -> bool {
        which::which(&self.shell).is_ok()
    }
}

#[async_trait]
impl Step for ShellStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_patterns(&self) -> &[String] {
        &self.inputs
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn options(&self) -> Option<&serde_json::Value> {
        self.options.as_ref()
    }

    async fn execute(&self, ctx: &StepContext) -> FlowResult<StepOutput> {
        let start = Instant::now();

        let inputs = ctx
            .inputs
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.command);
        cmd.current_dir(&ctx.working_dir);
        cmd.envs(&self.env);
        cmd.env(INPUTS_ENV, inputs);
        cmd.env(STEP_ENV, &self.name);

        debug!(step = %self.name, command = %self.command, "running shell step");

        let output = cmd.output().await.map_err(|e| FlowError::ToolExecutionFailed {
            tool: self.shell.clone(),
            error: e.to_string(),
            help: Some(format!("Shell '{}' may not be available", self.shell)),
        })?;

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if output.status.success() {
            Ok(StepOutput::new(self.outputs.clone(), stdout, duration))
        } else {
            Err(FlowError::StepFailed {
                step: self.name.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}
