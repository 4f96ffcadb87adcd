// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Build steps
//!
//! A step is the smallest unit of build work. The core only knows the
//! uniform [`Step`] contract; concrete transforms (style compilation,
//! transpiling, image compression) are supplied from outside, usually as
//! [`ShellStep`]s declared in the build file.

mod shell;

pub use shell::ShellStep;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{FlowError, FlowResult};

/// Everything a step needs to run
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Project directory; relative patterns and commands resolve against it
    pub working_dir: PathBuf,
    /// Files matched by the step's input patterns, sorted
    pub inputs: Vec<PathBuf>,
}

/// Output of a successful step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Files the step produced
    pub outputs: Vec<PathBuf>,
    /// Captured standard output
    pub stdout: String,
    /// Execution duration
    pub duration: Duration,
}

impl StepOutput {
    /// Create an output record
    pub fn new(outputs: Vec<PathBuf>, stdout: String, duration: Duration) -> Self {
        Self {
            outputs,
            stdout,
            duration,
        }
    }

    /// Whether every recorded output file still exists on disk
    pub fn outputs_present(&self, working_dir: &Path) -> bool {
        self.outputs.iter().all(|p| {
            if p.is_absolute() {
                p.exists()
            } else {
                working_dir.join(p).exists()
            }
        })
    }
}

/// Uniform contract for a unit of build work
///
/// Steps are registered once at startup and never mutated afterwards.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique step name
    fn name(&self) -> &str;

    /// Declared input glob patterns, in order
    fn input_patterns(&self) -> &[String];

    /// Whether outputs are deterministic in the inputs and may be cached
    fn cacheable(&self) -> bool {
        false
    }

    /// Options that influence the output and therefore the cache key
    fn options(&self) -> Option<&serde_json::Value> {
        None
    }

    /// Run the step
    async fn execute(&self, ctx: &StepContext) -> FlowResult<StepOutput>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name())
            .field("cacheable", &self.cacheable())
            .finish_non_exhaustive()
    }
}

/// Validate a glob pattern at build time
pub fn check_pattern(pattern: &str) -> FlowResult<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| FlowError::invalid_glob(pattern, e))
}

/// Resolve glob patterns to existing files
///
/// Unlike a typo in the pattern itself, a pattern with no matches is not an
/// error: the step simply sees fewer inputs.
pub fn resolve_globs(patterns: &[String], base_dir: &Path) -> FlowResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for pattern in patterns {
        let full_pattern = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            base_dir.join(pattern).to_string_lossy().to_string()
        };

        let matches = glob::glob(&full_pattern).map_err(|e| FlowError::invalid_glob(pattern, e))?;

        for path in matches.filter_map(Result::ok) {
            if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    files.dedup();

    Ok(files)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted steps for exercising pipelines without touching tools

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// A step that counts invocations and can be told to fail or stall
    pub struct ScriptedStep {
        name: String,
        patterns: Vec<String>,
        cacheable: bool,
        fail: bool,
        panic: bool,
        delay: Duration,
        calls: Arc<AtomicUsize>,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl ScriptedStep {
        pub fn ok(name: &str) -> Self {
            Self {
                name: name.into(),
                patterns: vec![],
                cacheable: false,
                fail: false,
                panic: false,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
                journal: None,
            }
        }

        pub fn failing(name: &str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name)
            }
        }

        pub fn panicking(name: &str) -> Self {
            Self {
                panic: true,
                ..Self::ok(name)
            }
        }

        pub fn cacheable(mut self, patterns: &[&str]) -> Self {
            self.cacheable = true;
            self.patterns = patterns.iter().map(|p| p.to_string()).collect();
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
            self.journal = Some(journal);
            self
        }

        pub fn counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.calls)
        }

        pub fn shared(self) -> Arc<dyn Step> {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl Step for ScriptedStep {
        fn name(&self) -> &str {
            &self.name
        }

        fn input_patterns(&self) -> &[String] {
            &self.patterns
        }

        fn cacheable(&self) -> bool {
            self.cacheable
        }

        async fn execute(&self, ctx: &StepContext) -> FlowResult<StepOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("{} panicked", self.name);
            }
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(format!("start:{}", self.name));
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(journal) = &self.journal {
                journal.lock().unwrap().push(format!("end:{}", self.name));
            }
            if self.fail {
                return Err(FlowError::StepFailed {
                    step: self.name.clone(),
                    exit_code: 1,
                    stderr: format!("{} broke", self.name),
                });
            }
            Ok(StepOutput::new(
                vec![],
                format!("{} processed {} file(s)", self.name, ctx.inputs.len()),
                self.delay,
            ))
        }
    }
}
