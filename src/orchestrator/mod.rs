// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Orchestrator
//!
//! Resolves task names to pipelines, runs them, sequences whole builds and
//! drives the serve loop. It is the only place a [`Watcher`] gets started.
//!
//! [`Watcher`]: crate::watch::Watcher

mod serve;

pub use serve::{ServeOptions, ServeSession, ServeState, ServeSummary};

use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{FlowError, FlowResult};
use crate::notifier::{Notifier, ReloadEvent};
use crate::pipeline::{PipelineExecutor, PipelineResult};
use crate::tasks::TaskRegistry;

/// Outcome of one task run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: String,
    pub result: PipelineResult,
    /// Reload messages delivered after the run
    pub reloads: usize,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.result.success()
    }

    /// Names of the leaf steps that failed
    pub fn failed_steps(&self) -> Vec<&str> {
        self.result.failed_steps()
    }

    /// Turn a failed run into [`FlowError::TaskFailed`]
    pub fn into_result(self) -> FlowResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(FlowError::TaskFailed {
                steps: self.failed_steps().iter().map(|s| s.to_string()).collect(),
                task: self.task,
            })
        }
    }
}

/// Outcome of a task sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    /// Tasks that ran, in order; only the last may have failed
    pub runs: Vec<RunReport>,
    /// Tasks not started because an earlier one failed
    pub skipped: Vec<String>,
}

impl SequenceReport {
    pub fn success(&self) -> bool {
        self.runs.iter().all(RunReport::success)
    }

    pub fn failed_task(&self) -> Option<&RunReport> {
        self.runs.iter().find(|r| !r.success())
    }

    /// The first failed run as an error, if any
    pub fn into_result(self) -> FlowResult<Self> {
        match self.failed_task().cloned() {
            Some(failed) => failed.into_result().map(|_| self),
            None => Ok(self),
        }
    }
}

/// Top-level driver
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<TaskRegistry>,
    executor: PipelineExecutor,
    notifier: Arc<Notifier>,
}

impl Orchestrator {
    pub fn new(registry: Arc<TaskRegistry>, executor: PipelineExecutor) -> Self {
        Self {
            registry,
            executor,
            notifier: Arc::new(Notifier::default()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &PipelineExecutor {
        &self.executor
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Run a task's pipeline
    ///
    /// An unknown name is an error; a failing step is not, it is reported
    /// in the returned [`RunReport`].
    pub async fn run(&self, name: &str) -> FlowResult<RunReport> {
        let task = self.registry.get(name)?;
        info!("Running task '{}'", name);

        let result = self.executor.execute(&task.pipeline).await;

        if result.success() {
            info!(
                "Task '{}' finished in {:.2}s",
                name,
                result.duration.as_secs_f64()
            );
        } else {
            for failure in &result.failures {
                warn!("Task '{}' step failed: {}", name, failure);
            }
        }

        Ok(RunReport {
            task: name.to_string(),
            result,
            reloads: 0,
        })
    }

    /// Run a task, then push reloads if it succeeded
    pub async fn run_and_notify(&self, name: &str) -> FlowResult<RunReport> {
        let mut report = self.run(name).await?;
        report.reloads = self
            .notifier
            .notify(&ReloadEvent::new(name, report.success()))
            .await;
        Ok(report)
    }

    /// Run tasks strictly in order, stopping at the first failure
    ///
    /// Every name is resolved before anything runs.
    pub async fn run_sequence<S: AsRef<str>>(&self, names: &[S]) -> FlowResult<SequenceReport> {
        for name in names {
            self.registry.get(name.as_ref())?;
        }

        let mut report = SequenceReport::default();
        let mut names = names.iter().map(|n| n.as_ref());

        for name in names.by_ref() {
            let run = self.run(name).await?;
            let failed = !run.success();
            report.runs.push(run);
            if failed {
                break;
            }
        }

        report.skipped = names.map(String::from).collect();
        if !report.skipped.is_empty() {
            warn!("Skipped after failure: {}", report.skipped.join(", "));
        }

        Ok(report)
    }

    /// Run tasks in order, then push one reload if every task succeeded
    pub async fn run_sequence_and_notify<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> FlowResult<SequenceReport> {
        let mut report = self.run_sequence(names).await?;
        let success = report.success();
        if let Some(last) = report.runs.last_mut() {
            last.reloads = self
                .notifier
                .notify(&ReloadEvent::new(&last.task, success))
                .await;
        }
        Ok(report)
    }
}
