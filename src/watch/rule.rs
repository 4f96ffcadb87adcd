// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Watch rules

use glob::{MatchOptions, Pattern};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::errors::{FlowError, FlowResult};
use crate::steps::check_pattern;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Glob patterns, a quiet-period window and the task they trigger
#[derive(Debug, Clone)]
pub struct WatchRule {
    patterns: Vec<String>,
    matchers: Vec<Pattern>,
    debounce: Duration,
    task: String,
}

impl WatchRule {
    /// Patterns are relative to the watch root; a leading `./` is ignored
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        debounce: Duration,
        task: impl Into<String>,
    ) -> FlowResult<Self> {
        let task = task.into();
        if patterns.is_empty() {
            return Err(FlowError::InvalidConfig {
                reason: format!("watch rule for task '{}' has no patterns", task),
                help: Some("Add at least one glob under 'patterns'".into()),
            });
        }

        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim_start_matches("./").to_string())
            .collect();
        let matchers = patterns
            .iter()
            .map(|p| check_pattern(p))
            .collect::<FlowResult<Vec<_>>>()?;

        Ok(Self {
            patterns,
            matchers,
            debounce,
            task,
        })
    }

    /// Whether a root-relative path matches any pattern
    pub fn matches(&self, path: &Path) -> bool {
        let path = path.strip_prefix(".").unwrap_or(path);
        self.matchers
            .iter()
            .any(|m| m.matches_path_with(path, MATCH_OPTIONS))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Directories that must be watched recursively to see every match
    ///
    /// This is the literal prefix of each pattern, up to the first
    /// component holding a wildcard. An empty path means the root itself.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.patterns.iter().map(|p| literal_base(p)).collect();
        roots.sort();
        roots.dedup();
        roots
    }
}

fn literal_base(pattern: &str) -> PathBuf {
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();
    let mut base = PathBuf::new();

    for (i, component) in components.iter().enumerate() {
        let Component::Normal(part) = component else {
            continue;
        };
        let part = part.to_string_lossy();
        if part.contains(['*', '?', '[']) || i + 1 == components.len() {
            break;
        }
        base.push(part.as_ref());
    }

    base
}
