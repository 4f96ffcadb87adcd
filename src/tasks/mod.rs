// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Task registry
//!
//! Tasks are the named entry points of a project. The registry is filled
//! once at startup and only read afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PipelineSpec;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::Pipeline;
use crate::steps::Step;

/// A named pipeline
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub description: Option<String>,
    pub pipeline: Pipeline,
}

impl Task {
    pub fn new(name: impl Into<String>, pipeline: Pipeline) -> Self {
        Self {
            name: name.into(),
            description: None,
            pipeline,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Name → task mapping with unique names
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task; fails if the name is taken
    pub fn register(&mut self, task: Task) -> FlowResult<()> {
        if self.tasks.contains_key(&task.name) {
            return Err(FlowError::DuplicateTask { name: task.name });
        }
        self.tasks.insert(task.name.clone(), task);
        Ok(())
    }

    /// Look up a task by name
    pub fn get(&self, name: &str) -> FlowResult<&Task> {
        self.tasks.get(name).ok_or_else(|| FlowError::TaskNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Tasks sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks.into_iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Turn a task's pipeline spec into a runnable pipeline
///
/// Step names resolve through `steps`; embedded tasks are inlined from
/// `tasks`. An embedding chain that returns to a task already being
/// compiled is reported as a cycle.
pub fn compile_pipeline(
    task: &str,
    spec: &PipelineSpec,
    steps: &HashMap<String, Arc<dyn Step>>,
    tasks: &HashMap<&str, &PipelineSpec>,
) -> FlowResult<Pipeline> {
    let mut stack = vec![task.to_string()];
    compile_node(spec, steps, tasks, &mut stack)
}

fn compile_node(
    spec: &PipelineSpec,
    steps: &HashMap<String, Arc<dyn Step>>,
    tasks: &HashMap<&str, &PipelineSpec>,
    stack: &mut Vec<String>,
) -> FlowResult<Pipeline> {
    match spec {
        PipelineSpec::Step(name) => steps
            .get(name)
            .map(|step| Pipeline::Step(Arc::clone(step)))
            .ok_or_else(|| FlowError::UnknownStep {
                task: current(stack),
                step: name.clone(),
            }),
        PipelineSpec::Task { task } => {
            if let Some(pos) = stack.iter().position(|t| t == task) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(task.clone());
                return Err(FlowError::CircularDependency { tasks: cycle });
            }
            let embedded = tasks.get(task.as_str()).ok_or_else(|| {
                FlowError::UnknownTaskReference {
                    task: current(stack),
                    reference: task.clone(),
                }
            })?;
            stack.push(task.clone());
            let pipeline = compile_node(embedded, steps, tasks, stack);
            stack.pop();
            pipeline
        }
        PipelineSpec::Sequential { sequential } => Ok(Pipeline::Sequential(
            sequential
                .iter()
                .map(|child| compile_node(child, steps, tasks, stack))
                .collect::<FlowResult<_>>()?,
        )),
        PipelineSpec::Parallel { parallel } => Ok(Pipeline::Parallel(
            parallel
                .iter()
                .map(|child| compile_node(child, steps, tasks, stack))
                .collect::<FlowResult<_>>()?,
        )),
    }
}

fn current(stack: &[String]) -> String {
    stack.last().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sequential;
    use crate::steps::testing::ScriptedStep;

    fn catalog(names: &[&str]) -> HashMap<String, Arc<dyn Step>> {
        names
            .iter()
            .map(|n| (n.to_string(), ScriptedStep::ok(n).shared()))
            .collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Task::new("styles", sequential([ScriptedStep::ok("compile").shared()])))
            .unwrap();

        assert!(registry.contains("styles"));
        assert_eq!(registry.get("styles").unwrap().pipeline.step_names(), vec!["compile"]);
        assert!(matches!(
            registry.get("scripts"),
            Err(FlowError::TaskNotFound { ref name }) if name == "scripts"
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TaskRegistry::new();
        let task = Task::new("styles", sequential([ScriptedStep::ok("compile").shared()]));
        registry.register(task.clone()).unwrap();

        let err = registry.register(task).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateTask { ref name } if name == "styles"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = TaskRegistry::new();
        for name in ["scripts", "build", "styles"] {
            registry
                .register(Task::new(name, sequential(Vec::<Pipeline>::new())))
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["build", "scripts", "styles"]);
    }

    #[test]
    fn test_compile_inlines_embedded_tasks() {
        let steps = catalog(&["lint", "transpile", "compile"]);
        let scripts = PipelineSpec::Sequential {
            sequential: vec![
                PipelineSpec::Step("lint".into()),
                PipelineSpec::Step("transpile".into()),
            ],
        };
        let build = PipelineSpec::Parallel {
            parallel: vec![
                PipelineSpec::Task { task: "scripts".into() },
                PipelineSpec::Step("compile".into()),
            ],
        };
        let tasks: HashMap<&str, &PipelineSpec> =
            [("scripts", &scripts), ("build", &build)].into_iter().collect();

        let pipeline = compile_pipeline("build", &build, &steps, &tasks).unwrap();
        assert_eq!(pipeline.to_string(), "((lint → transpile) | compile)");
    }

    #[test]
    fn test_compile_unknown_step() {
        let steps = catalog(&[]);
        let spec = PipelineSpec::Step("minify".into());
        let tasks = HashMap::new();

        let err = compile_pipeline("scripts", &spec, &steps, &tasks).unwrap_err();
        assert!(matches!(
            err,
            FlowError::UnknownStep { ref task, ref step } if task == "scripts" && step == "minify"
        ));
    }

    #[test]
    fn test_compile_detects_cycle() {
        let steps = catalog(&[]);
        let a = PipelineSpec::Task { task: "b".into() };
        let b = PipelineSpec::Task { task: "a".into() };
        let tasks: HashMap<&str, &PipelineSpec> = [("a", &a), ("b", &b)].into_iter().collect();

        let err = compile_pipeline("a", &a, &steps, &tasks).unwrap_err();
        assert!(matches!(
            err,
            FlowError::CircularDependency { ref tasks } if tasks == &["a", "b", "a"]
        ));
    }
}
