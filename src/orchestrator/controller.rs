//! Run lifecycle controller.
//!
//! Owns the orchestrator for the lifetime of the session and serializes every mutation:
//! UI commands, process events, the display tick and termination signals.

use super::Orchestrator;
use crate::model::ScanOptions;
use anyhow::Result;
use std::future::Future;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// Elapsed-time refresh rate while a scan is running.
const STATUS_TICK: Duration = Duration::from_millis(250);

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(ScanOptions),
    Cancel,
    Replay(String),
    ClearHistory,
    Quit,
}

/// Drive the orchestrator until the UI quits (or the process is told to terminate), then purge
/// the session history.
pub(crate) async fn run_controller(
    orch: Orchestrator,
    cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    run_controller_until(orch, cmd_rx, termination_signal()).await
}

/// `run_controller` with the termination source supplied by the caller.
async fn run_controller_until(
    mut orch: Orchestrator,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut quit_pending = false;
    // Cancel watchdog: keep UI feedback alive if the scanner is slow to die.
    let mut cancel_deadline: Option<Instant> = None;
    let mut ticker = tokio::time::interval(STATUS_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let still_stopping_after = orch.runner().grace_period() + Duration::from_secs(1);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start(opts)) => {
                        if let Err(e) = orch.start(opts) {
                            orch.report(&e);
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if orch.cancel() {
                            cancel_deadline = Some(Instant::now() + still_stopping_after);
                        }
                    }
                    Some(UiCommand::Replay(id)) => {
                        if orch.replay(&id).is_none() {
                            orch.info("History entry is no longer available");
                        }
                    }
                    Some(UiCommand::ClearHistory) => orch.clear_history(),
                    // A closed channel means the UI is gone; treat it as quit.
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if orch.cancel() {
                            cancel_deadline = Some(Instant::now() + still_stopping_after);
                        } else if !orch.is_busy() {
                            break;
                        }
                    }
                }
            }
            ev = orch.next_runner_event() => {
                if orch.handle_runner_event(ev).is_some() {
                    cancel_deadline = None;
                    if quit_pending {
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                orch.tick();
                if let Some(deadline) = cancel_deadline {
                    if Instant::now() >= deadline && orch.is_busy() {
                        orch.info("Still stopping…");
                        cancel_deadline = None;
                    }
                }
            }
            _ = &mut shutdown, if !quit_pending => {
                tracing::debug!("termination signal received");
                quit_pending = true;
                if orch.cancel() {
                    cancel_deadline = Some(Instant::now() + still_stopping_after);
                } else if !orch.is_busy() {
                    break;
                }
            }
        }
    }

    orch.shutdown().await;
    Ok(())
}

/// Resolves on SIGINT, SIGTERM or SIGHUP.
async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(mut term), Ok(mut hup)) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                    _ = hup.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use crate::model::{RunStatus, ScanEvent};
    use crate::runner::ProcessRunner;
    use tokio::sync::mpsc;

    fn orchestrator(dir: &tempfile::TempDir, script: &str) -> Orchestrator {
        let runner = ProcessRunner::new("/bin/sh")
            .with_leading_args(vec!["-c".into(), script.into(), "wpscan".into()])
            .with_grace_period(Duration::from_millis(300))
            .with_drain_timeout(Duration::from_millis(500));
        Orchestrator::new(runner, HistoryStore::new(dir.path().join("history.json")))
    }

    async fn next_finished(rx: &mut UnboundedReceiver<ScanEvent>) -> crate::model::ScanRun {
        loop {
            match rx.recv().await {
                Some(ScanEvent::RunFinished { run }) => return *run,
                Some(_) => continue,
                None => panic!("controller stopped before the run finished"),
            }
        }
    }

    #[tokio::test]
    async fn quit_during_a_run_cancels_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&dir, "echo go; sleep 30");
        let mut events = orch.subscribe();
        let path = orch.history().path().to_path_buf();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(orch, cmd_rx));

        cmd_tx
            .send(UiCommand::Start(ScanOptions::with_target("https://example.com")))
            .unwrap();
        loop {
            if let Some(ScanEvent::Output { .. }) = events.recv().await {
                break;
            }
        }
        cmd_tx.send(UiCommand::Quit).unwrap();

        let run = next_finished(&mut events).await;
        assert_eq!(run.status, RunStatus::Cancelled);
        tokio::time::timeout(Duration::from_secs(10), controller)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn busy_start_is_reported_and_first_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&dir, "sleep 0.3; echo done");
        let mut events = orch.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(orch, cmd_rx));

        cmd_tx
            .send(UiCommand::Start(ScanOptions::with_target("https://a.example")))
            .unwrap();
        cmd_tx
            .send(UiCommand::Start(ScanOptions::with_target("https://b.example")))
            .unwrap();

        let mut saw_busy = false;
        let run = loop {
            match events.recv().await {
                Some(ScanEvent::Warning(msg)) if msg.contains("already running") => {
                    saw_busy = true
                }
                Some(ScanEvent::RunFinished { run }) => break *run,
                Some(_) => {}
                None => panic!("controller stopped early"),
            }
        };
        assert!(saw_busy);
        assert_eq!(run.options.target, "https://a.example");
        assert_eq!(run.status, RunStatus::Completed { exit_code: 0 });

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn replay_and_clear_round_trip_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&dir, "echo stored");
        let mut events = orch.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(orch, cmd_rx));

        cmd_tx
            .send(UiCommand::Start(ScanOptions::with_target("https://example.com")))
            .unwrap();
        let run = next_finished(&mut events).await;

        cmd_tx.send(UiCommand::Replay(run.id.clone())).unwrap();
        let replayed = loop {
            if let Some(ScanEvent::Replay { run }) = events.recv().await {
                break run;
            }
        };
        assert_eq!(replayed.output.concat(), "stored\n");

        cmd_tx.send(UiCommand::ClearHistory).unwrap();
        loop {
            if let Some(ScanEvent::History { entries }) = events.recv().await {
                if entries.is_empty() {
                    break;
                }
            }
        }

        drop(cmd_tx);
        controller.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn termination_signal_cancels_and_purges() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(&dir, "echo stored; sleep 30");
        let mut events = orch.subscribe();
        let path = orch.history().path().to_path_buf();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();
        let terminated = async {
            let _ = signal_rx.await;
        };
        let controller = tokio::spawn(run_controller_until(orch, cmd_rx, terminated));

        cmd_tx
            .send(UiCommand::Start(ScanOptions::with_target("https://example.com")))
            .unwrap();
        loop {
            if let Some(ScanEvent::Output { .. }) = events.recv().await {
                break;
            }
        }
        signal_tx.send(()).unwrap();

        let run = next_finished(&mut events).await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.output.concat().contains("stored"));
        tokio::time::timeout(Duration::from_secs(10), controller)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!path.exists());
        drop(cmd_tx);
    }
}
