// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Quiet-period debouncing
//!
//! One debouncer runs per watch rule. A batch opens on the first matching
//! path and closes once `window` passes without another; the whole batch
//! becomes a single trigger.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Trigger, WatchSignal};

pub(crate) struct Debouncer {
    pub rule: usize,
    pub task: String,
    pub window: Duration,
}

impl Debouncer {
    /// Runs until `paths` closes; a batch still open at that point is flushed
    pub async fn run(
        self,
        mut paths: mpsc::UnboundedReceiver<PathBuf>,
        signals: mpsc::UnboundedSender<WatchSignal>,
    ) {
        while let Some(first) = paths.recv().await {
            let mut batch = BTreeSet::from([first]);
            let mut closed = false;

            loop {
                tokio::select! {
                    next = paths.recv() => match next {
                        Some(path) => {
                            batch.insert(path);
                        }
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = tokio::time::sleep(self.window) => break,
                }
            }

            debug!(
                "Rule #{} settled with {} changed path(s), triggering '{}'",
                self.rule,
                batch.len(),
                self.task
            );

            let trigger = Trigger {
                rule: self.rule,
                task: self.task.clone(),
                paths: batch.into_iter().collect(),
            };
            if signals.send(WatchSignal::Trigger(trigger)).is_err() || closed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    fn spawn(window_ms: u64) -> (
        mpsc::UnboundedSender<PathBuf>,
        mpsc::UnboundedReceiver<WatchSignal>,
    ) {
        let (path_tx, path_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer {
            rule: 0,
            task: "styles".into(),
            window: Duration::from_millis(window_ms),
        };
        tokio::spawn(debouncer.run(path_rx, signal_tx));
        (path_tx, signal_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_event_restarts_the_window() {
        let (paths, mut signals) = spawn(50);
        let start = Instant::now();

        paths.send("a.style".into()).unwrap();
        sleep(Duration::from_millis(40)).await;
        paths.send("b.style".into()).unwrap();

        let Some(WatchSignal::Trigger(trigger)) = signals.recv().await else {
            panic!("expected a trigger");
        };
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert_eq!(trigger.paths, vec![PathBuf::from("a.style"), PathBuf::from("b.style")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_trigger_separately() {
        let (paths, mut signals) = spawn(50);

        paths.send("a.style".into()).unwrap();
        sleep(Duration::from_millis(200)).await;
        paths.send("a.style".into()).unwrap();
        drop(paths);

        let mut count = 0;
        while let Some(signal) = signals.recv().await {
            assert!(matches!(signal, WatchSignal::Trigger(_)));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_batch_flushed_on_close() {
        let (paths, mut signals) = spawn(1_000);
        paths.send("a.style".into()).unwrap();
        paths.send("a.style".into()).unwrap();
        drop(paths);

        let Some(WatchSignal::Trigger(trigger)) = signals.recv().await else {
            panic!("expected a trigger");
        };
        assert_eq!(trigger.paths, vec![PathBuf::from("a.style")]);
        assert!(signals.recv().await.is_none());
    }
}
