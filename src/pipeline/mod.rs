// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Pipelines
//!
//! A pipeline is a tree of steps composed with two combinators:
//! [`sequential`] runs children strictly in order and stops at the first
//! failure; [`parallel`] starts every child at once and reports all
//! failures together.

mod executor;
mod graph;

pub use executor::{
    ArtifactCache, ExecutionOptions, PipelineExecutor, PipelineResult, StepFailure, StepRecord,
};
pub use graph::TaskGraph;

use std::fmt;
use std::sync::Arc;

use crate::steps::Step;

/// Composed tree of steps
#[derive(Clone)]
pub enum Pipeline {
    /// A single step
    Step(Arc<dyn Step>),
    /// Children run one after another
    Sequential(Vec<Pipeline>),
    /// Children run concurrently
    Parallel(Vec<Pipeline>),
}

/// Children strictly in order; aborts at the first failing child
pub fn sequential<I, P>(children: I) -> Pipeline
where
    I: IntoIterator<Item = P>,
    P: Into<Pipeline>,
{
    Pipeline::Sequential(children.into_iter().map(Into::into).collect())
}

/// Children concurrently; completes when all have finished
pub fn parallel<I, P>(children: I) -> Pipeline
where
    I: IntoIterator<Item = P>,
    P: Into<Pipeline>,
{
    Pipeline::Parallel(children.into_iter().map(Into::into).collect())
}

impl From<Arc<dyn Step>> for Pipeline {
    fn from(step: Arc<dyn Step>) -> Self {
        Self::Step(step)
    }
}

impl Pipeline {
    /// Names of every leaf step, depth first
    pub fn step_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Step(step) => out.push(step.name()),
            Self::Sequential(children) | Self::Parallel(children) => {
                for child in children {
                    child.collect_names(out);
                }
            }
        }
    }

    /// Number of leaf steps
    pub fn len(&self) -> usize {
        match self {
            Self::Step(_) => 1,
            Self::Sequential(children) | Self::Parallel(children) => {
                children.iter().map(Pipeline::len).sum()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compact one-line shape, e.g. `lint → (transpile | minify)`
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(step) => write!(f, "{}", step.name()),
            Self::Sequential(children) => write_group(f, children, " → ", false),
            Self::Parallel(children) => write_group(f, children, " | ", true),
        }
    }
}

fn write_group(
    f: &mut fmt::Formatter<'_>,
    children: &[Pipeline],
    sep: &str,
    parallel: bool,
) -> fmt::Result {
    if parallel || children.len() != 1 {
        write!(f, "(")?;
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", child)?;
    }
    if parallel || children.len() != 1 {
        write!(f, ")")?;
    }
    Ok(())
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline({})", self)
    }
}
