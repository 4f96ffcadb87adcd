// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 siteflow contributors

//! Serve loop
//!
//! `Idle → Running (initial tasks) → Watching ⇄ Running → Stopped`.
//!
//! Runs for different rules may overlap. A rule never has two runs in
//! flight; triggers arriving meanwhile collapse into one pending run that
//! starts when the current one ends.

use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{Orchestrator, RunReport};
use crate::errors::{FlowError, FlowResult};
use crate::watch::{EventSource, Trigger, WatchRule, WatchSignal, Watcher};

/// Where a serve session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    Idle,
    Watching,
    Running,
    Stopped,
}

/// What to serve
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub rules: Vec<WatchRule>,
    /// Run in order before watching starts; empty skips the initial build
    pub initial_tasks: Vec<String>,
    /// Preview client selector, handed to the launcher as-is
    pub browser: String,
}

/// Totals for a finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub runs: usize,
    pub failed_runs: usize,
    pub reloads: usize,
    pub watch_errors: usize,
}

impl ServeSummary {
    fn record(&mut self, report: &RunReport) {
        self.runs += 1;
        self.reloads += report.reloads;
        if !report.success() {
            self.failed_runs += 1;
        }
    }
}

/// Handle to a running serve loop
pub struct ServeSession {
    state: watch::Receiver<ServeState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<FlowResult<ServeSummary>>,
    browser: String,
}

impl ServeSession {
    /// Live view of the session state
    pub fn state(&self) -> watch::Receiver<ServeState> {
        self.state.clone()
    }

    pub fn browser(&self) -> &str {
        &self.browser
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for(&self, state: ServeState) -> FlowResult<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| FlowError::Watch {
                message: "serve loop ended".into(),
            })
    }

    /// Stop watching, abort in-flight runs and wait for the loop to exit
    pub async fn stop(mut self) -> FlowResult<ServeSummary> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join().await
    }

    /// Wait for the loop to end on its own (event source closed or failed)
    pub async fn join(self) -> FlowResult<ServeSummary> {
        self.handle.await.map_err(|e| FlowError::Watch {
            message: format!("serve loop panicked: {}", e),
        })?
    }
}

impl Orchestrator {
    /// Start serving: initial run, then re-run tasks as their rules trigger
    ///
    /// Every task named in `options` must exist. Must be called inside a
    /// tokio runtime.
    pub fn serve(&self, options: ServeOptions, source: EventSource) -> FlowResult<ServeSession> {
        for task in options.rules.iter().map(WatchRule::task) {
            self.registry.get(task)?;
        }
        for task in &options.initial_tasks {
            self.registry.get(task)?;
        }

        let (state_tx, state) = watch::channel(ServeState::Idle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let browser = options.browser.clone();

        let handle = tokio::spawn(serve_loop(
            self.clone(),
            options,
            source,
            state_tx,
            shutdown_rx,
        ));

        Ok(ServeSession {
            state,
            shutdown: Some(shutdown_tx),
            handle,
            browser,
        })
    }
}

async fn serve_loop(
    orchestrator: Orchestrator,
    options: ServeOptions,
    source: EventSource,
    state: watch::Sender<ServeState>,
    mut shutdown: oneshot::Receiver<()>,
) -> FlowResult<ServeSummary> {
    let mut summary = ServeSummary::default();

    if !options.initial_tasks.is_empty() {
        state.send_replace(ServeState::Running);
        tokio::select! {
            report = orchestrator.run_sequence_and_notify(&options.initial_tasks) => {
                for run in &report?.runs {
                    summary.record(run);
                }
            }
            _ = &mut shutdown => {
                state.send_replace(ServeState::Stopped);
                return Ok(summary);
            }
        }
    }

    let mut watcher = match Watcher::start(&options.rules, source) {
        Ok(watcher) => watcher,
        Err(e) => {
            state.send_replace(ServeState::Stopped);
            return Err(e);
        }
    };
    state.send_replace(ServeState::Watching);
    info!("Watching for changes");

    let rule_count = options.rules.len();
    let mut running = vec![false; rule_count];
    let mut pending: Vec<Option<Trigger>> = vec![None; rule_count];
    let mut runs: JoinSet<(usize, FlowResult<RunReport>)> = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            signal = watcher.next() => match signal {
                Some(WatchSignal::Trigger(trigger)) => {
                    let rule = trigger.rule;
                    if running[rule] {
                        debug!("Rule #{} busy, queueing '{}'", rule, trigger.task);
                        pending[rule] = Some(trigger);
                    } else {
                        running[rule] = true;
                        spawn_run(&mut runs, &orchestrator, trigger);
                    }
                }
                Some(WatchSignal::Error(e)) => {
                    summary.watch_errors += 1;
                    warn!("{}", e);
                }
                None => {
                    debug!("Event source ended");
                    break;
                }
            },

            Some(joined) = runs.join_next(), if !runs.is_empty() => match joined {
                Ok((rule, report)) => {
                    running[rule] = false;
                    match report {
                        Ok(report) => summary.record(&report),
                        Err(e) => {
                            summary.failed_runs += 1;
                            warn!("{}", e);
                        }
                    }
                    if let Some(next) = pending[rule].take() {
                        running[rule] = true;
                        spawn_run(&mut runs, &orchestrator, next);
                    }
                }
                Err(e) => warn!("Run aborted: {}", e),
            },
        }

        state.send_replace(if runs.is_empty() {
            ServeState::Watching
        } else {
            ServeState::Running
        });
    }

    // Runs that already finished still count; the rest are cancelled.
    runs.abort_all();
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((_, Ok(report))) => summary.record(&report),
            Ok((_, Err(e))) => warn!("{}", e),
            Err(e) if e.is_cancelled() => info!("In-flight run cancelled"),
            Err(e) => warn!("Run aborted: {}", e),
        }
    }
    watcher.stop().await;

    state.send_replace(ServeState::Stopped);
    info!(
        runs = summary.runs,
        failed = summary.failed_runs,
        reloads = summary.reloads,
        "Serve stopped"
    );
    Ok(summary)
}

fn spawn_run(
    runs: &mut JoinSet<(usize, FlowResult<RunReport>)>,
    orchestrator: &Orchestrator,
    trigger: Trigger,
) {
    info!(
        "{} change(s) matched rule #{}, running '{}'",
        trigger.paths.len(),
        trigger.rule,
        trigger.task
    );
    let orchestrator = orchestrator.clone();
    runs.spawn(async move {
        let report = orchestrator.run_and_notify(&trigger.task).await;
        (trigger.rule, report)
    });
}
