// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Content hashing for cache keys
//!
//! Uses BLAKE3 for fast, secure content hashing. Every field is written with
//! a length prefix so distinct tuples never produce the same byte stream.

use blake3::Hasher;
use std::path::{Path, PathBuf};

use super::CacheKey;
use crate::errors::{FlowError, FlowResult};
use crate::steps::Step;

/// Content hasher for generating cache keys
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a new content hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Key for a step run over `inputs`
    ///
    /// Covers the step name, its canonicalized options, and for every input
    /// the canonical absolute path and the file contents.
    pub fn step_key(step: &dyn Step, inputs: &[PathBuf]) -> FlowResult<CacheKey> {
        let mut hasher = Self::new();

        hasher.field(b"step");
        hasher.field(step.name().as_bytes());

        hasher.field(b"options");
        let options = step
            .options()
            .map(canonical_json)
            .unwrap_or_default();
        hasher.field(options.as_bytes());

        let mut paths: Vec<PathBuf> = inputs
            .iter()
            .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
            .collect();
        paths.sort();
        paths.dedup();

        hasher.field(b"inputs");
        hasher.update(&(paths.len() as u64).to_le_bytes());
        for path in &paths {
            hasher.field(path.to_string_lossy().as_bytes());
            hasher.hash_file(path)?;
        }

        Ok(hasher.finalize_key())
    }

    /// Hash a single file's contents
    pub fn hash_file(&mut self, path: &Path) -> FlowResult<()> {
        let content = std::fs::read(path).map_err(|e| FlowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        self.field(&content);
        Ok(())
    }

    /// Hash a length-prefixed field
    pub fn field(&mut self, data: &[u8]) {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize into a cache key
    pub fn finalize_key(self) -> CacheKey {
        CacheKey::new(self.hasher.finalize().as_bytes().to_vec())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize JSON with object keys sorted at every level
fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}
