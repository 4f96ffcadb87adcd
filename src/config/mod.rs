// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Build file definitions
//!
//! Defines the schema for `.siteflow.yaml` / `.siteflow.toml` files and
//! compiles them into a runnable [`Project`].

mod validation;

pub use validation::{ConfigValidator, ValidationResult};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{FlowError, FlowResult};
use crate::pipeline::TaskGraph;
use crate::steps::{check_pattern, ShellStep, Step};
use crate::tasks::{compile_pipeline, Task, TaskRegistry};
use crate::watch::WatchRule;

/// Default build file name
pub const DEFAULT_BUILD_FILE: &str = ".siteflow.yaml";

/// Build file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFile {
    /// Schema version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Project name
    pub name: String,

    /// Project description
    #[serde(default)]
    pub description: Option<String>,

    /// Step catalog
    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    /// Named tasks
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,

    /// Watch rules used by `serve`
    #[serde(default)]
    pub watch: Vec<WatchDefinition>,

    /// Live-preview settings
    #[serde(default)]
    pub serve: ServeSettings,

    /// Tasks run in order when no task is named
    #[serde(default)]
    pub default: Vec<String>,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_version() -> String {
    "1".to_string()
}

/// A shell-driven build step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name (must be unique)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Input glob patterns
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Files the step writes
    #[serde(default)]
    pub outputs: Vec<PathBuf>,

    /// Shell command to run
    pub command: String,

    /// Shell to use (bash, sh, etc.)
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Environment variables for this step
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Whether identical inputs may reuse a previous output
    #[serde(default)]
    pub cacheable: bool,

    /// Transform options; part of the cache key
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl StepDefinition {
    /// Build the runnable step
    pub fn to_step(&self) -> ShellStep {
        ShellStep::new(&self.name, &self.command)
            .with_shell(&self.shell)
            .with_inputs(self.inputs.clone())
            .with_outputs(self.outputs.clone())
            .with_env(self.env.clone())
            .with_cacheable(self.cacheable)
            .with_options(self.options.clone())
    }
}

/// A named task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task name (must be unique)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// What the task runs
    pub run: PipelineSpec,
}

/// Pipeline node as written in the build file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PipelineSpec {
    /// A step, by name
    Step(String),

    /// Another task's pipeline, by task name
    Task { task: String },

    /// Children in order
    Sequential { sequential: Vec<PipelineSpec> },

    /// Children concurrently
    Parallel { parallel: Vec<PipelineSpec> },
}

impl PipelineSpec {
    /// Task names referenced anywhere in this node
    pub fn task_references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Self::Task { task } = node {
                out.push(task.as_str());
            }
        });
        out
    }

    /// Step names referenced anywhere in this node
    pub fn step_references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Self::Step(step) = node {
                out.push(step.as_str());
            }
        });
        out
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        match self {
            Self::Sequential { sequential: children } | Self::Parallel { parallel: children } => {
                for child in children {
                    child.walk(visit);
                }
            }
            Self::Step(_) | Self::Task { .. } => {}
        }
    }
}

/// Watch rule as written in the build file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchDefinition {
    /// Glob patterns relative to the project root
    pub patterns: Vec<String>,

    /// Quiet period before a batch of changes triggers the task
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Task to run
    pub task: String,
}

fn default_debounce_ms() -> u64 {
    100
}

/// Live-preview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeSettings {
    /// Tasks run in order before watching starts; the default sequence when unset
    #[serde(default)]
    pub initial_tasks: Option<Vec<String>>,

    /// Reload server bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Reload server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Delay between a successful run and the reload push
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,

    /// Preview client to open; passed through to the launcher untouched
    #[serde(default = "default_browser")]
    pub browser: String,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            initial_tasks: None,
            host: default_host(),
            port: default_port(),
            reload_delay_ms: default_reload_delay_ms(),
            browser: default_browser(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_reload_delay_ms() -> u64 {
    50
}

fn default_browser() -> String {
    "default".to_string()
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Enable caching
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// A compiled, ready-to-run project
#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub registry: Arc<TaskRegistry>,
    pub watch_rules: Vec<WatchRule>,
    pub serve: ServeSettings,
    pub default_sequence: Vec<String>,
    pub cache_enabled: bool,
    pub steps: Vec<Arc<ShellStep>>,
}

impl BuildFile {
    /// Load a build file; `.toml` files are parsed as TOML, everything else as YAML
    pub fn from_file(path: &Path) -> FlowResult<Self> {
        if !path.exists() {
            return Err(FlowError::BuildFileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FlowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse from YAML string
    pub fn from_yaml(yaml: &str) -> FlowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse from TOML string
    pub fn from_toml(source: &str) -> FlowResult<Self> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Get a task definition by name
    pub fn get_task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Compile into a runnable project
    ///
    /// Every configuration error (duplicate names, malformed globs, unknown
    /// references, task cycles) is raised here, before anything runs.
    pub fn compile(&self) -> FlowResult<Project> {
        let mut catalog: HashMap<String, Arc<dyn Step>> = HashMap::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for def in &self.steps {
            for pattern in &def.inputs {
                check_pattern(pattern)?;
            }
            let step = Arc::new(def.to_step());
            if catalog
                .insert(def.name.clone(), step.clone() as Arc<dyn Step>)
                .is_some()
            {
                return Err(FlowError::DuplicateStep {
                    name: def.name.clone(),
                });
            }
            steps.push(step);
        }

        // Rejects duplicate task names, unknown task references and cycles.
        TaskGraph::build(&self.tasks)?;

        let specs: HashMap<&str, &PipelineSpec> =
            self.tasks.iter().map(|t| (t.name.as_str(), &t.run)).collect();

        let mut registry = TaskRegistry::new();
        for def in &self.tasks {
            let pipeline = compile_pipeline(&def.name, &def.run, &catalog, &specs)?;
            let mut task = Task::new(&def.name, pipeline);
            if let Some(description) = &def.description {
                task = task.with_description(description);
            }
            registry.register(task)?;
        }

        let mut watch_rules = Vec::with_capacity(self.watch.len());
        for def in &self.watch {
            if !registry.contains(&def.task) {
                return Err(unknown_task_in("watch rule", &def.task));
            }
            watch_rules.push(WatchRule::new(
                &def.patterns,
                Duration::from_millis(def.debounce_ms),
                &def.task,
            )?);
        }

        for name in self.serve.initial_tasks.iter().flatten() {
            if !registry.contains(name) {
                return Err(unknown_task_in("serve.initial_tasks", name));
            }
        }

        for name in &self.default {
            if !registry.contains(name) {
                return Err(unknown_task_in("default sequence", name));
            }
        }

        Ok(Project {
            name: self.name.clone(),
            registry: Arc::new(registry),
            watch_rules,
            serve: self.serve.clone(),
            default_sequence: self.default.clone(),
            cache_enabled: self.cache.enabled,
            steps,
        })
    }
}

impl Project {
    /// Tasks `serve` runs before it starts watching
    pub fn initial_tasks(&self) -> Vec<String> {
        self.serve
            .initial_tasks
            .clone()
            .unwrap_or_else(|| self.default_sequence.clone())
    }
}

fn unknown_task_in(place: &str, task: &str) -> FlowError {
    FlowError::InvalidConfig {
        reason: format!("{} refers to unknown task '{}'", place, task),
        help: Some("Run 'siteflow list' to see the defined tasks".into()),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A build file shaped like a typical static-site project
    pub const SITE: &str = r#"
name: "site"
steps:
  - name: compile-styles
    inputs: ["app/styles/**/*.scss"]
    outputs: ["dist/styles/main.css"]
    command: "sass app/styles/main.scss dist/styles/main.css"
  - name: lint-scripts
    inputs: ["app/scripts/*.js"]
    command: "eslint app/scripts"
  - name: transpile-scripts
    inputs: ["app/scripts/*.js"]
    command: "babel app/scripts -d dist/scripts"
    cacheable: true
    options:
      presets: ["env"]
  - name: compress-images
    inputs: ["app/images/**/*"]
    command: "imagemin app/images --out-dir=dist/images"
    cacheable: true
    options: { optimizationLevel: 3, progressive: true }
  - name: copy-html
    inputs: ["app/*.html"]
    command: "cp app/*.html dist/"
tasks:
  - name: styles
    description: "Compile stylesheets"
    run: { sequential: [compile-styles] }
  - name: scripts
    run: { sequential: [lint-scripts, transpile-scripts] }
  - name: images
    run: compress-images
  - name: build
    description: "Full production build"
    run:
      parallel:
        - task: styles
        - task: scripts
        - sequential: [compress-images, copy-html]
watch:
  - patterns: ["app/styles/**/*.scss"]
    debounce_ms: 50
    task: styles
  - patterns: ["app/scripts/*.js"]
    task: scripts
serve:
  initial_tasks: [build]
  port: 9100
default: [styles, scripts]
"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_site_build_file() {
        let file = BuildFile::from_yaml(fixtures::SITE).unwrap();

        assert_eq!(file.name, "site");
        assert_eq!(file.steps.len(), 5);
        assert_eq!(file.steps[0].shell, "bash");
        assert_eq!(file.watch[1].debounce_ms, 100);
        assert_eq!(file.serve.port, 9100);
        assert_eq!(file.serve.reload_delay_ms, 50);
        assert_eq!(file.serve.browser, "default");
        assert!(file.cache.enabled);

        let build = file.get_task("build").unwrap();
        assert_eq!(build.run.task_references(), vec!["styles", "scripts"]);
        assert_eq!(build.run.step_references(), vec!["compress-images", "copy-html"]);
        assert_eq!(
            file.get_task("images").unwrap().run,
            PipelineSpec::Step("compress-images".into())
        );
    }

    #[test]
    fn test_compile_site_project() {
        let project = BuildFile::from_yaml(fixtures::SITE).unwrap().compile().unwrap();

        assert_eq!(project.registry.len(), 4);
        assert_eq!(project.watch_rules.len(), 2);
        assert_eq!(project.default_sequence, vec!["styles", "scripts"]);
        assert_eq!(project.initial_tasks(), vec!["build"]);

        let build = project.registry.get("build").unwrap();
        assert_eq!(
            build.pipeline.step_names(),
            vec!["compile-styles", "lint-scripts", "transpile-scripts", "compress-images", "copy-html"]
        );
    }

    #[test]
    fn test_initial_tasks_fall_back_to_default_sequence() {
        let yaml = r#"
name: site
steps:
  - { name: compile, command: "true" }
tasks:
  - { name: styles, run: compile }
watch:
  - { patterns: ["app/*.scss"], task: styles }
default: [styles]
"#;
        let project = BuildFile::from_yaml(yaml).unwrap().compile().unwrap();
        assert!(project.serve.initial_tasks.is_none());
        assert_eq!(project.initial_tasks(), vec!["styles"]);
    }

    #[test]
    fn test_parse_toml_build_file() {
        let source = r#"
name = "site"
default = ["styles"]

[[steps]]
name = "compile"
command = "true"
inputs = ["app/styles/*.scss"]

[[tasks]]
name = "styles"
run = { sequential = ["compile"] }
"#;
        let project = BuildFile::from_toml(source).unwrap().compile().unwrap();
        assert!(project.registry.contains("styles"));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let yaml = r#"
name: dup
steps:
  - { name: a, command: "true" }
tasks:
  - { name: styles, run: a }
  - { name: styles, run: a }
"#;
        let err = BuildFile::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, FlowError::DuplicateTask { ref name } if name == "styles"));
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let yaml = r#"
name: dup
steps:
  - { name: a, command: "true" }
  - { name: a, command: "false" }
"#;
        let err = BuildFile::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep { .. }));
    }

    #[test]
    fn test_task_cycle_rejected_at_compile() {
        let yaml = r#"
name: cyclic
steps:
  - { name: a, command: "true" }
tasks:
  - { name: build, run: { sequential: [a, { task: serve }] } }
  - { name: serve, run: { parallel: [{ task: build }] } }
"#;
        let err = BuildFile::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, FlowError::CircularDependency { .. }));
    }

    #[test]
    fn test_malformed_glob_rejected() {
        let yaml = r#"
name: globs
steps:
  - { name: a, command: "true", inputs: ["app/[scripts"] }
"#;
        let err = BuildFile::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, FlowError::InvalidGlob { .. }));
    }

    #[test]
    fn test_watch_rule_with_unknown_task_rejected() {
        let yaml = r#"
name: w
steps:
  - { name: a, command: "true" }
tasks:
  - { name: styles, run: a }
watch:
  - { patterns: ["*.scss"], task: scripts }
"#;
        let err = BuildFile::from_yaml(yaml).unwrap().compile().unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = BuildFile::from_file(Path::new("/nonexistent/.siteflow.yaml")).unwrap_err();
        assert!(matches!(err, FlowError::BuildFileNotFound { .. }));
    }
}
