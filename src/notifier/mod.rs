// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Reload notifications
//!
//! Preview clients hold a [`PreviewSession`]; after a successful run the
//! [`Notifier`] pushes one [`ReloadMessage`] to every session connected at
//! that moment. Failed runs push nothing.

mod server;

pub use server::ReloadServer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::FlowResult;

/// Outcome of a run, as seen by the notifier
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    pub triggered_by: String,
    pub success: bool,
    pub timestamp: SystemTime,
}

impl ReloadEvent {
    pub fn new(triggered_by: impl Into<String>, success: bool) -> Self {
        Self {
            triggered_by: triggered_by.into(),
            success,
            timestamp: SystemTime::now(),
        }
    }
}

/// Wire message sent to preview clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReloadMessage {
    Reload {
        #[serde(rename = "triggeredBy")]
        triggered_by: String,
    },
}

impl ReloadMessage {
    /// JSON followed by a newline
    pub fn to_line(&self) -> FlowResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A connected preview client
#[derive(Debug)]
pub struct PreviewSession {
    id: u64,
    rx: mpsc::UnboundedReceiver<ReloadMessage>,
}

impl PreviewSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next message; `None` after disconnect
    pub async fn recv(&mut self) -> Option<ReloadMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ReloadMessage> {
        self.rx.try_recv().ok()
    }
}

/// Set of connected preview sessions
#[derive(Debug, Default)]
pub struct Notifier {
    sessions: Mutex<HashMap<u64, mpsc::UnboundedSender<ReloadMessage>>>,
    next_id: AtomicU64,
    reload_delay: Duration,
}

impl Notifier {
    pub fn new(reload_delay: Duration) -> Self {
        Self {
            reload_delay,
            ..Self::default()
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<ReloadMessage>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session
    pub fn connect(&self) -> PreviewSession {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions().insert(id, tx);
        debug!(session = id, "Preview session connected");
        PreviewSession { id, rx }
    }

    /// Remove a session; returns false if it was not connected
    pub fn disconnect(&self, id: u64) -> bool {
        let removed = self.sessions().remove(&id).is_some();
        if removed {
            debug!(session = id, "Preview session disconnected");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Push a reload to every connected session
    ///
    /// Returns the number of messages delivered. Failed runs and an empty
    /// session set deliver nothing. Sessions whose receiver is gone are
    /// pruned.
    pub async fn notify(&self, event: &ReloadEvent) -> usize {
        if !event.success {
            debug!(task = %event.triggered_by, "Run failed, no reload sent");
            return 0;
        }

        if !self.reload_delay.is_zero() {
            tokio::time::sleep(self.reload_delay).await;
        }

        let message = ReloadMessage::Reload {
            triggered_by: event.triggered_by.clone(),
        };

        let mut delivered = 0;
        self.sessions().retain(|id, tx| {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                debug!(session = *id, "Pruning closed preview session");
                false
            }
        });

        debug!(task = %event.triggered_by, delivered, "Reload pushed");
        delivered
    }
}
