// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Task reference graph
//!
//! Tasks may embed other tasks. This graph holds an edge from every task to
//! each task it embeds, rejects cycles, and renders the structure for the
//! `graph` command.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

use crate::config::TaskDefinition;
use crate::errors::FlowError;

/// Graph of task-to-task references
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    name_to_index: BTreeMap<String, NodeIndex>,
    steps: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Build the graph from task definitions
    pub fn build(tasks: &[TaskDefinition]) -> Result<Self, FlowError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = BTreeMap::new();
        let mut steps = HashMap::new();

        for task in tasks {
            if name_to_index.contains_key(&task.name) {
                return Err(FlowError::DuplicateTask {
                    name: task.name.clone(),
                });
            }
            let node = graph.add_node(task.name.clone());
            name_to_index.insert(task.name.clone(), node);
            steps.insert(
                task.name.clone(),
                task.run.step_references().into_iter().map(String::from).collect(),
            );
        }

        for task in tasks {
            let from = name_to_index[&task.name];
            for reference in task.run.task_references() {
                let to = name_to_index.get(reference).ok_or_else(|| {
                    FlowError::UnknownTaskReference {
                        task: task.name.clone(),
                        reference: reference.to_string(),
                    }
                })?;
                if !graph.contains_edge(from, *to) {
                    graph.add_edge(from, *to, ());
                }
            }
        }

        let built = Self {
            graph,
            name_to_index,
            steps,
        };
        built.validate_acyclic()?;

        Ok(built)
    }

    fn validate_acyclic(&self) -> Result<(), FlowError> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(FlowError::CircularDependency {
                tasks: self.find_cycle(cycle.node_id()),
            }),
        }
    }

    /// Walk from `start` until a node repeats; returns the cycle path
    fn find_cycle(&self, start: NodeIndex) -> Vec<String> {
        let mut path = vec![start];
        let mut on_path = vec![false; self.graph.node_count()];
        on_path[start.index()] = true;

        if let Some(cycle) = self.extend_cycle(&mut path, &mut on_path) {
            return cycle;
        }

        vec![self.graph[start].clone()]
    }

    fn extend_cycle(&self, path: &mut Vec<NodeIndex>, on_path: &mut [bool]) -> Option<Vec<String>> {
        let current = *path.last()?;

        for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
            if on_path[next.index()] {
                let from = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[from..].iter().map(|n| self.graph[*n].clone()).collect();
                cycle.push(self.graph[next].clone());
                return Some(cycle);
            }

            path.push(next);
            on_path[next.index()] = true;
            if let Some(cycle) = self.extend_cycle(path, on_path) {
                return Some(cycle);
            }
            on_path[next.index()] = false;
            path.pop();
        }

        None
    }

    /// Task names with embedded tasks before the tasks embedding them
    pub fn topological_order_names(&self) -> Result<Vec<String>, FlowError> {
        toposort(&self.graph, None)
            .map(|nodes| {
                nodes
                    .into_iter()
                    .rev()
                    .map(|n| self.graph[n].clone())
                    .collect()
            })
            .map_err(|cycle| FlowError::CircularDependency {
                tasks: self.find_cycle(cycle.node_id()),
            })
    }

    /// Tasks directly embedded by `task`
    pub fn references(&self, task: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(task)?;
        let mut refs: Vec<String> = self
            .graph
            .neighbors_directed(*node, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        refs.sort();
        Some(refs)
    }

    /// Tasks that directly embed `task`
    pub fn embedded_by(&self, task: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(task)?;
        let mut users: Vec<String> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect();
        users.sort();
        Some(users)
    }

    /// Generate Mermaid diagram
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (name, node) in &self.name_to_index {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
            for step in &self.steps[name] {
                out.push_str(&format!(
                    "    {} -.-> {}_step_{}([{}])\n",
                    mermaid_id(name),
                    mermaid_id(name),
                    mermaid_id(step),
                    step
                ));
            }
            for target in self.graph.neighbors_directed(*node, Direction::Outgoing) {
                out.push_str(&format!(
                    "    {} --> {}\n",
                    mermaid_id(name),
                    mermaid_id(&self.graph[target])
                ));
            }
        }

        out
    }

    /// Generate DOT diagram
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph tasks {\n");
        out.push_str("    rankdir=LR;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (name, node) in &self.name_to_index {
            out.push_str(&format!("    \"{}\";\n", name));
            for target in self.graph.neighbors_directed(*node, Direction::Outgoing) {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", name, self.graph[target]));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Plain text listing, embedded tasks first
    pub fn to_text(&self) -> Result<String, FlowError> {
        let order = self.topological_order_names()?;
        let mut out = String::new();

        for (i, name) in order.iter().enumerate() {
            out.push_str(&format!("{}. {}", i + 1, name));

            let steps = &self.steps[name];
            if !steps.is_empty() {
                out.push_str(&format!(" (steps: {})", steps.join(", ")));
            }

            let refs = self.references(name).unwrap_or_default();
            if !refs.is_empty() {
                out.push_str(&format!(" [runs: {}]", refs.join(", ")));
            }

            let users = self.embedded_by(name).unwrap_or_default();
            if !users.is_empty() {
                out.push_str(&format!(" [used by: {}]", users.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineSpec;

    fn task(name: &str, refs: &[&str]) -> TaskDefinition {
        let mut children = vec![PipelineSpec::Step(format!("{}-step", name))];
        children.extend(refs.iter().map(|r| PipelineSpec::Task {
            task: r.to_string(),
        }));
        TaskDefinition {
            name: name.into(),
            description: None,
            run: PipelineSpec::Sequential {
                sequential: children,
            },
        }
    }

    #[test]
    fn test_embedded_tasks_come_first() {
        let graph = TaskGraph::build(&[
            task("build", &["styles", "scripts"]),
            task("styles", &[]),
            task("scripts", &[]),
        ])
        .unwrap();

        let order = graph.topological_order_names().unwrap();
        assert_eq!(order.last().unwrap(), "build");
        assert_eq!(graph.references("build").unwrap(), vec!["scripts", "styles"]);
        assert_eq!(graph.embedded_by("styles").unwrap(), vec!["build"]);
    }

    #[test]
    fn test_cycle_path_reported() {
        let err = TaskGraph::build(&[
            task("a", &["b"]),
            task("b", &["c"]),
            task("c", &["a"]),
        ])
        .err()
        .unwrap();

        match err {
            FlowError::CircularDependency { tasks } => {
                assert_eq!(tasks.len(), 4);
                assert_eq!(tasks.first(), tasks.last());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let result = TaskGraph::build(&[task("loop", &["loop"])]);
        assert!(matches!(
            result,
            Err(FlowError::CircularDependency { ref tasks }) if tasks == &["loop", "loop"]
        ));
    }

    #[test]
    fn test_unknown_reference() {
        let result = TaskGraph::build(&[task("build", &["missing"])]);
        assert!(matches!(result, Err(FlowError::UnknownTaskReference { .. })));
    }

    #[test]
    fn test_renderings() {
        let graph = TaskGraph::build(&[task("build", &["styles"]), task("styles", &[])]).unwrap();

        let mermaid = graph.to_mermaid();
        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("build --> styles"));

        let dot = graph.to_dot();
        assert!(dot.contains("\"build\" -> \"styles\";"));

        let text = graph.to_text().unwrap();
        assert_eq!(
            text,
            "1. styles (steps: styles-step) [used by: build]\n2. build (steps: build-step) [runs: styles]\n"
        );
    }
}
