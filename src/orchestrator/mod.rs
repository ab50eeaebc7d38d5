//! Scan orchestration.
//!
//! `Orchestrator` owns the single active-run slot, the process runner and the session history.
//! It is driven from one task by `run_controller`, which serializes UI commands, runner events,
//! display ticks and termination signals.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};

use crate::args::{build_argv, render_command};
use crate::error::ScanError;
use crate::history::HistoryStore;
use crate::model::{RunStatus, ScanEvent, ScanOptions, ScanRun};
use crate::runner::{ExitOutcome, ProcessRunner, RunHandle, RunnerEvent};
use crate::status::StatusTracker;
use rand::RngCore;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// The run currently occupying the slot.
struct ActiveRun {
    run: ScanRun,
    tracker: StatusTracker,
    handle: RunHandle,
    events: UnboundedReceiver<RunnerEvent>,
    cancel_requested: bool,
}

pub struct Orchestrator {
    runner: ProcessRunner,
    history: HistoryStore,
    active: Option<ActiveRun>,
    last_status: RunStatus,
    last_elapsed: Duration,
    subscribers: Vec<UnboundedSender<ScanEvent>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("runner", &self.runner)
            .field("history_len", &self.history.len())
            .field("status", &self.status())
            .finish()
    }
}

/// Random 64-bit run id, hex encoded.
fn new_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

impl Orchestrator {
    pub fn new(runner: ProcessRunner, history: HistoryStore) -> Self {
        Self {
            runner,
            history,
            active: None,
            last_status: RunStatus::Idle,
            last_elapsed: Duration::ZERO,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<ScanEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// True while a run holds the slot and has not reached a terminal state.
    pub fn is_busy(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.tracker.is_terminal())
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.run.id.as_str())
    }

    /// Status of the active run, or of the most recent one.
    pub fn status(&self) -> RunStatus {
        match &self.active {
            Some(a) => a.tracker.status().clone(),
            None => self.last_status.clone(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match &self.active {
            Some(a) => a.tracker.elapsed(),
            None => self.last_elapsed,
        }
    }

    /// Session start: pick up an existing history file, if any.
    pub fn load_history(&mut self) {
        if let Err(w) = self.history.load() {
            tracing::warn!("{w}");
            self.publish(ScanEvent::Warning(w.to_string()));
        }
        self.publish_history();
    }

    /// Validate, build argv and spawn. Fails with `Busy` while another run is live.
    pub fn start(&mut self, options: ScanOptions) -> Result<String, ScanError> {
        if self.is_busy() {
            return Err(ScanError::Busy);
        }
        let argv = build_argv(&options)?;
        let command = self.display_command(&argv);

        let mut tracker = StatusTracker::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = match self.runner.start(&argv, tx) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("{e}");
                tracker.fail(e.to_string());
                self.active = None;
                self.last_status = tracker.status().clone();
                self.last_elapsed = Duration::ZERO;
                self.publish(ScanEvent::Status {
                    status: self.last_status.clone(),
                    elapsed: Duration::ZERO,
                });
                return Err(e);
            }
        };
        tracker.start();

        let id = new_run_id();
        tracing::info!(id = %id, target = %options.target, "scan started");
        let run = ScanRun::new(id.clone(), options, command.clone());
        self.active = Some(ActiveRun {
            run,
            tracker,
            handle,
            events: rx,
            cancel_requested: false,
        });

        self.publish(ScanEvent::RunStarted {
            id: id.clone(),
            command,
        });
        self.publish(ScanEvent::Status {
            status: RunStatus::Running,
            elapsed: Duration::ZERO,
        });
        Ok(id)
    }

    /// Request cancellation of the live run. Repeated calls and calls while idle do nothing.
    pub fn cancel(&mut self) -> bool {
        let requested = match self.active.as_mut() {
            Some(a) if !a.tracker.is_terminal() && !a.cancel_requested => {
                a.cancel_requested = true;
                a.handle.cancel();
                true
            }
            _ => false,
        };
        if requested {
            tracing::info!(id = ?self.active_id(), "cancelling scan");
            self.publish(ScanEvent::Info("Stopping scan…".into()));
        }
        requested
    }

    /// Next event from the active run's process. Never resolves while the slot is empty.
    pub async fn next_runner_event(&mut self) -> RunnerEvent {
        let Some(active) = self.active.as_mut() else {
            return futures::future::pending().await;
        };
        match active.events.recv().await {
            Some(ev) => ev,
            // The runner always sends Exit before closing; this only covers a lost supervisor.
            None if active.cancel_requested => RunnerEvent::Exit(ExitOutcome::Cancelled),
            None => RunnerEvent::Exit(ExitOutcome::Exited { code: None }),
        }
    }

    /// Apply one runner event. Returns the finalized run on exit.
    pub fn handle_runner_event(&mut self, ev: RunnerEvent) -> Option<ScanRun> {
        match ev {
            RunnerEvent::Chunk(chunk) => {
                let active = self.active.as_mut()?;
                active.run.output.push(chunk.clone());
                let id = active.run.id.clone();
                self.publish(ScanEvent::Output { id, chunk });
                None
            }
            RunnerEvent::Exit(outcome) => self.finish(outcome),
        }
    }

    /// Drive the active run to completion. Returns `None` when nothing was running.
    pub async fn wait_for_exit(&mut self) -> Option<ScanRun> {
        while self.active.is_some() {
            let ev = self.next_runner_event().await;
            if let Some(run) = self.handle_runner_event(ev) {
                return Some(run);
            }
        }
        None
    }

    fn finish(&mut self, outcome: ExitOutcome) -> Option<ScanRun> {
        let ActiveRun {
            mut run,
            mut tracker,
            ..
        } = self.active.take()?;
        tracker.finish(&outcome);

        let status = tracker.status().clone();
        let elapsed = tracker.elapsed();
        run.status = status.clone();
        run.exit_code = match outcome {
            ExitOutcome::Exited { code } => code,
            ExitOutcome::Cancelled => None,
        };
        run.duration_seconds = elapsed.as_secs_f64();
        tracing::info!(
            id = %run.id,
            status = %status.label(),
            secs = run.duration_seconds,
            "scan finished"
        );

        self.last_status = status.clone();
        self.last_elapsed = elapsed;
        self.publish(ScanEvent::Status { status, elapsed });

        if let Err(w) = self.history.record(run.clone()) {
            tracing::warn!("{w}");
            self.publish(ScanEvent::Warning(w.to_string()));
        }
        self.publish(ScanEvent::RunFinished {
            run: Box::new(run.clone()),
        });
        self.publish_history();
        Some(run)
    }

    /// Re-emit a stored run's output. Never spawns anything.
    pub fn replay(&mut self, id: &str) -> Option<ScanRun> {
        let run = self.history.get(id).cloned()?;
        self.publish(ScanEvent::Replay {
            run: Box::new(run.clone()),
        });
        Some(run)
    }

    pub fn clear_history(&mut self) {
        if let Err(w) = self.history.clear() {
            tracing::warn!("{w}");
            self.publish(ScanEvent::Warning(w.to_string()));
        }
        self.publish_history();
        self.publish(ScanEvent::Info("History cleared".into()));
    }

    /// Session teardown: wipe in-memory history and the backing file.
    pub fn purge_history(&mut self) {
        if let Err(w) = self.history.purge() {
            tracing::warn!("{w}");
        }
    }

    /// Cancel anything live, wait for it within the runner's budget, then purge.
    pub async fn shutdown(&mut self) {
        if self.cancel() {
            let budget = self.runner.shutdown_budget() + Duration::from_secs(1);
            if tokio::time::timeout(budget, self.wait_for_exit())
                .await
                .is_err()
            {
                tracing::warn!("scan did not stop within {budget:?}");
            }
        }
        self.purge_history();
    }

    /// Periodic elapsed-time refresh for displays.
    pub fn tick(&mut self) {
        if self.is_busy() {
            let elapsed = self.elapsed();
            self.publish(ScanEvent::Status {
                status: RunStatus::Running,
                elapsed,
            });
        }
    }

    pub fn report(&mut self, err: &ScanError) {
        self.publish(ScanEvent::Warning(err.to_string()));
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.publish(ScanEvent::Info(msg.into()));
    }

    fn display_command(&self, argv: &[String]) -> String {
        let program = self.runner.program().display().to_string();
        let full: Vec<String> = self
            .runner
            .leading_args()
            .iter()
            .chain(argv)
            .cloned()
            .collect();
        render_command(&program, &full)
    }

    fn publish_history(&mut self) {
        let entries = self.history.list().iter().map(ScanRun::summary).collect();
        self.publish(ScanEvent::History { entries });
    }

    fn publish(&mut self, ev: ScanEvent) {
        self.subscribers.retain(|tx| tx.send(ev.clone()).is_ok());
    }
}
