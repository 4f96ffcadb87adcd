// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Filesystem event source backed by `notify`

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::SourceEvent;
use crate::errors::{FlowError, FlowResult};

/// Start an OS watcher over `dirs` (relative to `root`)
///
/// Per-directory failures are sent as [`SourceEvent::Failed`] and do not
/// stop the other directories from being watched. The returned watcher
/// owns the OS resources; dropping it releases them.
pub(crate) fn watch_dirs(
    root: &Path,
    dirs: &[PathBuf],
    events: mpsc::UnboundedSender<SourceEvent>,
) -> FlowResult<RecommendedWatcher> {
    let callback_events = events.clone();
    let fallback = root.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    let _ = callback_events.send(SourceEvent::Changed(path));
                }
            }
            Err(e) => {
                let message = describe(&e);
                if e.paths.is_empty() {
                    let _ = callback_events.send(SourceEvent::Failed {
                        path: fallback.clone(),
                        message,
                    });
                } else {
                    for path in e.paths {
                        let _ = callback_events.send(SourceEvent::Failed {
                            path,
                            message: message.clone(),
                        });
                    }
                }
            }
        }
    })
    .map_err(|e| FlowError::Watch {
        message: e.to_string(),
    })?;

    for dir in dirs {
        let full = root.join(dir);
        if !full.is_dir() {
            warn!("Watch directory does not exist: {}", full.display());
            let _ = events.send(SourceEvent::Failed {
                path: full,
                message: "directory does not exist".into(),
            });
            continue;
        }

        match watcher.watch(&full, RecursiveMode::Recursive) {
            Ok(()) => debug!("Watching {}", full.display()),
            Err(e) => {
                warn!("Cannot watch {}: {}", full.display(), e);
                let _ = events.send(SourceEvent::Failed {
                    path: full,
                    message: describe(&e),
                });
            }
        }
    }

    Ok(watcher)
}

fn describe(e: &notify::Error) -> String {
    match &e.kind {
        notify::ErrorKind::Generic(message) => message.clone(),
        notify::ErrorKind::Io(io) => io.to_string(),
        notify::ErrorKind::PathNotFound => "path not found".to_string(),
        notify::ErrorKind::MaxFilesWatch => "OS watch limit reached".to_string(),
        other => format!("{:?}", other),
    }
}

/// Drop directories already covered by a shallower one
pub(crate) fn outermost(mut dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    dirs.sort();
    dirs.dedup();
    let mut kept: Vec<PathBuf> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !kept.iter().any(|k| dir.starts_with(k)) {
            kept.push(dir);
        }
    }
    kept
}
