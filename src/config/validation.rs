// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Build file validation
//!
//! Collects every problem in one pass instead of stopping at the first, so
//! the `validate` command can show the full picture.

use std::collections::HashSet;

use super::{BuildFile, StepDefinition};
use crate::errors::FlowError;
use crate::pipeline::TaskGraph;
use crate::steps::check_pattern;

/// Build file validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a build file
    pub fn validate(file: &BuildFile) -> ValidationResult {
        let mut result = ValidationResult::new();

        if file.tasks.is_empty() {
            result.add_error("Build file has no tasks defined");
        }

        let mut step_names = HashSet::new();
        for step in &file.steps {
            if !step_names.insert(step.name.as_str()) {
                result.add_error(&format!("Duplicate step name: '{}'", step.name));
            }
            Self::validate_step(step, &mut result);
        }

        match TaskGraph::build(&file.tasks) {
            Ok(_) => {}
            Err(FlowError::CircularDependency { tasks }) => {
                result.add_error(&format!("Circular task reference: {}", tasks.join(" → ")));
            }
            Err(FlowError::DuplicateTask { name }) => {
                result.add_error(&format!("Duplicate task name: '{}'", name));
            }
            Err(e) => result.add_error(&e.to_string()),
        }

        let mut used_steps = HashSet::new();
        for task in &file.tasks {
            for step in task.run.step_references() {
                used_steps.insert(step);
                if !step_names.contains(step) {
                    result.add_error(&format!(
                        "Task '{}' uses unknown step '{}'",
                        task.name, step
                    ));
                }
            }
        }

        for step in &file.steps {
            if !used_steps.contains(step.name.as_str()) {
                result.add_warning(&format!(
                    "Step '{}' is not used by any task",
                    step.name
                ));
            }
        }

        let task_names: HashSet<&str> = file.tasks.iter().map(|t| t.name.as_str()).collect();

        for (i, rule) in file.watch.iter().enumerate() {
            if rule.patterns.is_empty() {
                result.add_error(&format!("Watch rule #{} has no patterns", i + 1));
            }
            for pattern in &rule.patterns {
                if let Err(e) = check_pattern(pattern) {
                    result.add_error(&format!("Watch rule #{}: {}", i + 1, e));
                }
            }
            if !task_names.contains(rule.task.as_str()) {
                result.add_error(&format!(
                    "Watch rule #{} triggers unknown task '{}'",
                    i + 1,
                    rule.task
                ));
            }
            if rule.debounce_ms == 0 {
                result.add_warning(&format!(
                    "Watch rule #{} has no debounce window; every change triggers a run",
                    i + 1
                ));
            }
        }

        for name in &file.default {
            if !task_names.contains(name.as_str()) {
                result.add_error(&format!("Default sequence names unknown task '{}'", name));
            }
        }

        for name in file.serve.initial_tasks.iter().flatten() {
            if !task_names.contains(name.as_str()) {
                result.add_error(&format!("serve.initial_tasks names unknown task '{}'", name));
            }
        }

        result
    }

    /// Validate a single step
    fn validate_step(step: &StepDefinition, result: &mut ValidationResult) {
        if step.command.trim().is_empty() {
            result.add_error(&format!("Step '{}': Shell command is empty", step.name));
        }

        for pattern in &step.inputs {
            if let Err(e) = check_pattern(pattern) {
                result.add_error(&format!("Step '{}': {}", step.name, e));
            }
        }

        if step.cacheable && step.inputs.is_empty() {
            result.add_warning(&format!(
                "Step '{}': cacheable without inputs - every run will reuse the first output",
                step.name
            ));
        }
    }
}

/// Result of build file validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
