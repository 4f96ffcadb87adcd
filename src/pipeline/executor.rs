// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Pipeline executor
//!
//! Walks a pipeline tree, running steps and consulting the artifact cache
//! for cacheable ones.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ContentHasher};
use crate::errors::FlowError;
use crate::pipeline::Pipeline;
use crate::steps::{resolve_globs, Step, StepContext, StepOutput};

/// Cache of step outputs shared by every run in the process
pub type ArtifactCache = CacheStore<StepOutput, StepFailure>;

/// Pipeline execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Skip cache lookups
    pub no_cache: bool,
}

/// A failed leaf step and why it failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: String,
    pub cause: String,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            cause: cause.into(),
        }
    }

    fn from_error(step: &str, err: &FlowError) -> Self {
        Self::new(step, err.failure_cause())
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.cause)
    }
}

/// A step that completed successfully
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: String,
    pub output: StepOutput,
    /// Output came from the cache rather than this run's computation
    pub cache_hit: bool,
}

/// Result of executing a pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Successful steps in completion order
    pub records: Vec<StepRecord>,
    /// Failed leaf steps; sequential failures in order, parallel ones by child position
    pub failures: Vec<StepFailure>,
    /// Total execution time
    pub duration: Duration,
}

impl PipelineResult {
    /// Whether every attempted step succeeded
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the failed leaf steps
    pub fn failed_steps(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.step.as_str()).collect()
    }

    fn absorb(&mut self, other: PipelineResult) {
        self.records.extend(other.records);
        self.failures.extend(other.failures);
    }
}

type NodeFuture = Pin<Box<dyn Future<Output = PipelineResult> + Send>>;

/// Aborts spawned children if the parent run is dropped
struct ChildTasks(Vec<(Vec<String>, JoinHandle<PipelineResult>)>);

impl Drop for ChildTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Pipeline executor
#[derive(Clone)]
pub struct PipelineExecutor {
    working_dir: Arc<PathBuf>,
    cache: Option<Arc<ArtifactCache>>,
    options: ExecutionOptions,
}

impl PipelineExecutor {
    /// Create a new pipeline executor rooted at `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Arc::new(working_dir.into()),
            cache: None,
            options: ExecutionOptions::default(),
        }
    }

    /// Set the cache layer
    pub fn with_cache(mut self, cache: Arc<ArtifactCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn cache(&self) -> Option<&Arc<ArtifactCache>> {
        self.cache.as_ref()
    }

    /// Execute a pipeline to completion
    pub async fn execute(&self, pipeline: &Pipeline) -> PipelineResult {
        let start = Instant::now();
        let mut result = self.run_node(pipeline.clone()).await;
        result.duration = start.elapsed();
        result
    }

    fn run_node(&self, node: Pipeline) -> NodeFuture {
        let this = self.clone();

        Box::pin(async move {
            match node {
                Pipeline::Step(step) => this.run_step(step).await,
                Pipeline::Sequential(children) => this.run_sequential(children).await,
                Pipeline::Parallel(children) => this.run_parallel(children).await,
            }
        })
    }

    async fn run_sequential(&self, children: Vec<Pipeline>) -> PipelineResult {
        let mut result = PipelineResult::default();
        let total = children.len();

        for (i, child) in children.into_iter().enumerate() {
            let child_result = self.run_node(child).await;
            let failed = !child_result.success();
            result.absorb(child_result);

            if failed {
                if i + 1 < total {
                    debug!(skipped = total - i - 1, "sequence aborted");
                }
                break;
            }
        }

        result
    }

    async fn run_parallel(&self, children: Vec<Pipeline>) -> PipelineResult {
        let mut tasks = ChildTasks(
            children
                .into_iter()
                .map(|child| {
                    let steps = child.step_names().into_iter().map(String::from).collect();
                    (steps, tokio::spawn(self.run_node(child)))
                })
                .collect(),
        );

        let mut result = PipelineResult::default();

        for (steps, handle) in tasks.0.iter_mut() {
            match handle.await {
                Ok(child_result) => result.absorb(child_result),
                // The child's own records are lost; blame each of its leaf steps.
                Err(e) => {
                    warn!(steps = %steps.join(", "), "parallel child did not complete: {}", e);
                    for step in steps.iter() {
                        result.failures.push(StepFailure::new(step.clone(), e.to_string()));
                    }
                }
            }
        }

        result
    }

    async fn run_step(&self, step: Arc<dyn Step>) -> PipelineResult {
        let name = step.name().to_string();
        let mut result = PipelineResult::default();

        let inputs = match resolve_globs(step.input_patterns(), &self.working_dir) {
            Ok(inputs) => inputs,
            Err(e) => {
                result.failures.push(StepFailure::from_error(&name, &e));
                return result;
            }
        };

        let ctx = StepContext {
            working_dir: self.working_dir.as_ref().clone(),
            inputs,
        };

        debug!(step = %name, inputs = ctx.inputs.len(), "starting step");

        let outcome = match &self.cache {
            Some(cache) if step.cacheable() && !self.options.no_cache => {
                self.run_cached(cache, step.as_ref(), &ctx).await
            }
            _ => step
                .execute(&ctx)
                .await
                .map(|output| (output, false))
                .map_err(|e| StepFailure::from_error(&name, &e)),
        };

        match outcome {
            Ok((output, cache_hit)) => {
                if cache_hit {
                    info!(step = %name, "reused cached output");
                } else {
                    info!(step = %name, "finished in {:.2}s", output.duration.as_secs_f64());
                }
                result.records.push(StepRecord {
                    step: name,
                    output,
                    cache_hit,
                });
            }
            Err(failure) => {
                warn!(step = %name, "failed: {}", failure.cause);
                result.failures.push(failure);
            }
        }

        result
    }

    async fn run_cached(
        &self,
        cache: &ArtifactCache,
        step: &dyn Step,
        ctx: &StepContext,
    ) -> Result<(StepOutput, bool), StepFailure> {
        let key = ContentHasher::step_key(step, &ctx.inputs)
            .map_err(|e| StepFailure::from_error(step.name(), &e))?;

        let stale = cache.invalidate_if(&key, |entry| {
            !entry.artifact.outputs_present(&self.working_dir)
        });
        if stale {
            debug!(step = %step.name(), %key, "cached outputs missing, recomputing");
        }

        let computed = AtomicBool::new(false);
        let output = cache
            .get_or_compute(&key, || async {
                computed.store(true, Ordering::SeqCst);
                step.execute(ctx)
                    .await
                    .map_err(|e| StepFailure::from_error(step.name(), &e))
            })
            .await?;

        Ok((output, !computed.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{parallel, sequential};
    use crate::steps::testing::ScriptedStep;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn executor() -> PipelineExecutor {
        PipelineExecutor::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let first = ScriptedStep::ok("compile");
        let second = ScriptedStep::failing("lint");
        let third = ScriptedStep::ok("transpile");
        let fourth = ScriptedStep::ok("minify");
        let counters = [first.counter(), second.counter(), third.counter(), fourth.counter()];

        let pipeline = sequential([first.shared(), second.shared(), third.shared(), fourth.shared()]);
        let result = executor().execute(&pipeline).await;

        assert!(!result.success());
        assert_eq!(result.failed_steps(), vec!["lint"]);
        let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(calls, vec![1, 1, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_children_never_overlap() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = sequential([
            ScriptedStep::ok("a")
                .with_delay(Duration::from_millis(30))
                .with_journal(Arc::clone(&journal))
                .shared(),
            ScriptedStep::ok("b")
                .with_delay(Duration::from_millis(10))
                .with_journal(Arc::clone(&journal))
                .shared(),
        ]);

        assert!(executor().execute(&pipeline).await.success());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["start:a", "end:a", "start:b", "end:b"]
        );
    }

    #[tokio::test]
    async fn test_parallel_attempts_all_and_names_each_failure() {
        let steps = [
            ScriptedStep::failing("styles"),
            ScriptedStep::ok("scripts"),
            ScriptedStep::failing("images"),
            ScriptedStep::ok("fonts"),
        ];
        let counters: Vec<_> = steps.iter().map(|s| s.counter()).collect();

        let pipeline = parallel(steps.into_iter().map(ScriptedStep::shared));
        let result = executor().execute(&pipeline).await;

        assert!(!result.success());
        assert_eq!(result.failed_steps(), vec!["styles", "images"]);
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(result.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_children_run_concurrently() {
        let pipeline = parallel([
            ScriptedStep::ok("a").with_delay(Duration::from_secs(1)).shared(),
            ScriptedStep::ok("b").with_delay(Duration::from_secs(1)).shared(),
            ScriptedStep::ok("c").with_delay(Duration::from_secs(1)).shared(),
        ]);

        let start = tokio::time::Instant::now();
        let result = executor().execute(&pipeline).await;

        assert!(result.success());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_panicking_branch_is_blamed_on_its_leaf_steps() {
        let pipeline = parallel([
            Pipeline::from(ScriptedStep::ok("fonts").shared()),
            sequential([
                ScriptedStep::ok("lint").shared(),
                ScriptedStep::panicking("transpile").shared(),
            ]),
        ]);
        let result = executor().execute(&pipeline).await;

        assert!(!result.success());
        assert_eq!(result.failed_steps(), vec!["lint", "transpile"]);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].step, "fonts");
    }

    #[tokio::test]
    async fn test_failure_inside_nested_parallel_aborts_outer_sequence() {
        let after = ScriptedStep::ok("copy-html");
        let after_calls = after.counter();

        let pipeline = sequential([
            parallel([
                ScriptedStep::ok("compile").shared(),
                ScriptedStep::failing("validate-html").shared(),
            ]),
            Pipeline::from(after.shared()),
        ]);
        let result = executor().execute(&pipeline).await;

        assert_eq!(result.failed_steps(), vec!["validate-html"]);
        assert_eq!(after_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cacheable_step_computed_once_for_same_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.js"), "let x = 1").unwrap();

        let step = ScriptedStep::ok("transpile").cacheable(&["*.js"]);
        let calls = step.counter();
        let pipeline = sequential([step.shared()]);

        let exec = PipelineExecutor::new(dir.path()).with_cache(Arc::new(ArtifactCache::new()));

        let first = exec.execute(&pipeline).await;
        let second = exec.execute(&pipeline).await;

        assert!(first.success() && second.success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.records[0].cache_hit);
        assert!(second.records[0].cache_hit);

        std::fs::write(dir.path().join("app.js"), "let x = 2").unwrap();
        exec.execute(&pipeline).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_cache_option_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let step = ScriptedStep::ok("compress").cacheable(&["*.png"]);
        let calls = step.counter();
        let pipeline = sequential([step.shared()]);

        let exec = PipelineExecutor::new(dir.path())
            .with_cache(Arc::new(ArtifactCache::new()))
            .with_options(ExecutionOptions { no_cache: true });

        exec.execute(&pipeline).await;
        exec.execute(&pipeline).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_cacheable_step_is_retried() {
        let dir = TempDir::new().unwrap();
        let step = ScriptedStep::failing("compile").cacheable(&["*.scss"]);
        let calls = step.counter();
        let pipeline = sequential([step.shared()]);
        let exec = PipelineExecutor::new(dir.path()).with_cache(Arc::new(ArtifactCache::new()));

        assert!(!exec.execute(&pipeline).await.success());
        assert!(!exec.execute(&pipeline).await.success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
