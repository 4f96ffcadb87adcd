// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! File watching
//!
//! A [`Watcher`] session turns raw change events into coalesced triggers,
//! one per settled burst per rule. Events come either from the OS or from
//! an [`EventInjector`], so the debounce and routing logic can be driven
//! without touching the filesystem.
//!
//! ```text
//! EventSource ──► dispatcher ──► debouncer (rule 0) ──┐
//!                     │      └─► debouncer (rule 1) ──┼──► Watcher::next()
//!                     └── errors ─────────────────────┘
//! ```

mod debounce;
mod fs;
mod rule;

pub use rule::WatchRule;

use notify::RecommendedWatcher;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{FlowError, FlowResult};
use debounce::Debouncer;

/// A raw event before rule matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Something at `path` was created, modified or removed
    Changed(PathBuf),
    /// `path` could not be watched or read
    Failed { path: PathBuf, message: String },
}

/// Where a watcher gets its events from
pub enum EventSource {
    /// OS notifications for the directories under `root` that the rules need
    Filesystem { root: PathBuf },
    /// Events pushed through an [`EventInjector`]
    Injected(mpsc::UnboundedReceiver<SourceEvent>),
}

impl EventSource {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::Filesystem { root: root.into() }
    }

    /// A source fed by hand, with the handle that feeds it
    pub fn injected() -> (Self, EventInjector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Injected(rx), EventInjector { tx })
    }
}

/// Pushes synthetic events into an injected source
#[derive(Debug, Clone)]
pub struct EventInjector {
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl EventInjector {
    /// Returns false once the watcher is gone
    pub fn send(&self, event: SourceEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn change(&self, path: impl Into<PathBuf>) -> bool {
        self.send(SourceEvent::Changed(path.into()))
    }

    pub fn fail(&self, path: impl Into<PathBuf>, message: impl Into<String>) -> bool {
        self.send(SourceEvent::Failed {
            path: path.into(),
            message: message.into(),
        })
    }
}

/// A debounced batch of changes for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Index of the rule in the slice the watcher was started with
    pub rule: usize,
    pub task: String,
    /// Changed paths relative to the watch root, sorted
    pub paths: Vec<PathBuf>,
}

/// What a watcher hands to its consumer
#[derive(Debug)]
pub enum WatchSignal {
    Trigger(Trigger),
    /// A path-level problem; monitoring continues
    Error(FlowError),
}

/// A running watch session
pub struct Watcher {
    signals: mpsc::UnboundedReceiver<WatchSignal>,
    dispatcher: Option<JoinHandle<()>>,
    debouncers: Vec<JoinHandle<()>>,
    os_watcher: Option<RecommendedWatcher>,
}

impl Watcher {
    /// Start monitoring; must be called inside a tokio runtime
    pub fn start(rules: &[WatchRule], source: EventSource) -> FlowResult<Self> {
        let (signal_tx, signals) = mpsc::unbounded_channel();

        let mut routes = Vec::with_capacity(rules.len());
        let mut debouncers = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let (path_tx, path_rx) = mpsc::unbounded_channel();
            let debouncer = Debouncer {
                rule: index,
                task: rule.task().to_string(),
                window: rule.debounce(),
            };
            debouncers.push(tokio::spawn(debouncer.run(path_rx, signal_tx.clone())));
            routes.push((rule.clone(), path_tx));
        }

        let (events, root, os_watcher) = match source {
            EventSource::Injected(rx) => (rx, None, None),
            EventSource::Filesystem { root } => {
                let root = root.canonicalize().unwrap_or(root);
                let dirs = fs::outermost(rules.iter().flat_map(WatchRule::watch_roots).collect());
                let (tx, rx) = mpsc::unbounded_channel();
                let os_watcher = fs::watch_dirs(&root, &dirs, tx)?;
                (rx, Some(root), Some(os_watcher))
            }
        };

        info!("Watching {} rule(s)", rules.len());
        let dispatcher = tokio::spawn(dispatch(events, root, routes, signal_tx));

        Ok(Self {
            signals,
            dispatcher: Some(dispatcher),
            debouncers,
            os_watcher,
        })
    }

    /// Next trigger or path error; `None` once the event source has ended
    pub async fn next(&mut self) -> Option<WatchSignal> {
        self.signals.recv().await
    }

    /// Stop monitoring
    ///
    /// Pending debounce windows are cancelled and OS watches are released.
    /// Nothing is delivered after this returns.
    pub async fn stop(mut self) {
        for handle in &self.debouncers {
            handle.abort();
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.abort();
        }

        for handle in self.debouncers.drain(..) {
            let _ = handle.await;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }

        self.os_watcher.take();
        self.signals.close();
        while self.signals.try_recv().is_ok() {}

        info!("Watcher stopped");
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        for handle in &self.debouncers {
            handle.abort();
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.abort();
        }
    }
}

/// Route each change to every rule whose patterns match it
async fn dispatch(
    mut events: mpsc::UnboundedReceiver<SourceEvent>,
    root: Option<PathBuf>,
    routes: Vec<(WatchRule, mpsc::UnboundedSender<PathBuf>)>,
    signals: mpsc::UnboundedSender<WatchSignal>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SourceEvent::Changed(path) => {
                let relative = relative_to(&path, root.as_deref());
                for (rule, tx) in &routes {
                    if rule.matches(&relative) {
                        let _ = tx.send(relative.clone());
                    }
                }
            }
            SourceEvent::Failed { path, message } => {
                warn!("Watch error on {}: {}", path.display(), message);
                let _ = signals.send(WatchSignal::Error(FlowError::WatchIo { path, message }));
            }
        }
    }
    debug!("Event source closed");
}

fn relative_to(path: &Path, root: Option<&Path>) -> PathBuf {
    let path = root
        .and_then(|root| path.strip_prefix(root).ok())
        .unwrap_or(path);
    path.strip_prefix(".").unwrap_or(path).to_path_buf()
}
