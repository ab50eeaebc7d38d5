//! Per-run status state machine and elapsed-time clock.

use crate::model::RunStatus;
use crate::runner::ExitOutcome;
use std::time::{Duration, Instant};

/// Tracks one run from `Idle` to a terminal state.
///
/// A tracker is never reused: every run gets a fresh instance, so once a terminal state is
/// reached all further transitions are ignored.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    status: RunStatus,
    started_at: Option<Instant>,
    finished_after: Option<Duration>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Idle,
            started_at: None,
            finished_after: None,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Idle -> Running`. Returns false if the tracker was not idle.
    pub fn start(&mut self) -> bool {
        if self.status != RunStatus::Idle {
            return false;
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Instant::now());
        true
    }

    /// Apply the runner's exit signal. Only valid while running.
    pub fn finish(&mut self, outcome: &ExitOutcome) -> bool {
        if self.status != RunStatus::Running {
            return false;
        }
        self.status = match outcome {
            ExitOutcome::Cancelled => RunStatus::Cancelled,
            ExitOutcome::Exited { code: Some(code) } => RunStatus::Completed { exit_code: *code },
            ExitOutcome::Exited { code: None } => RunStatus::Failed {
                reason: "terminated by signal".into(),
            },
        };
        self.stop_clock();
        true
    }

    /// Spawn failure. Valid from `Idle` (never started) or `Running`.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = RunStatus::Failed {
            reason: reason.into(),
        };
        self.stop_clock();
        true
    }

    /// Time since start, frozen once the run is terminal.
    pub fn elapsed(&self) -> Duration {
        match (self.finished_after, self.started_at) {
            (Some(done), _) => done,
            (None, Some(start)) => start.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    fn stop_clock(&mut self) {
        self.finished_after = Some(
            self.started_at
                .map(|start| start.elapsed())
                .unwrap_or_default(),
        );
    }
}

/// `mm:ss` for status chips.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let t = StatusTracker::new();
        assert_eq!(t.status(), &RunStatus::Idle);
        assert!(!t.is_terminal());
        assert_eq!(t.elapsed(), Duration::ZERO);
    }

    #[test]
    fn exit_code_becomes_completed() {
        let mut t = StatusTracker::new();
        assert!(t.start());
        assert!(t.finish(&ExitOutcome::Exited { code: Some(3) }));
        assert_eq!(t.status(), &RunStatus::Completed { exit_code: 3 });
        assert!(t.is_terminal());
    }

    #[test]
    fn cancel_outcome_becomes_cancelled() {
        let mut t = StatusTracker::new();
        t.start();
        t.finish(&ExitOutcome::Cancelled);
        assert_eq!(t.status(), &RunStatus::Cancelled);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut t = StatusTracker::new();
        t.start();
        t.finish(&ExitOutcome::Exited { code: Some(0) });
        assert!(!t.finish(&ExitOutcome::Cancelled));
        assert!(!t.fail("late"));
        assert!(!t.start());
        assert_eq!(t.status(), &RunStatus::Completed { exit_code: 0 });
    }

    #[test]
    fn finish_requires_running() {
        let mut t = StatusTracker::new();
        assert!(!t.finish(&ExitOutcome::Exited { code: Some(0) }));
        assert_eq!(t.status(), &RunStatus::Idle);
    }

    #[test]
    fn spawn_failure_from_idle() {
        let mut t = StatusTracker::new();
        assert!(t.fail("not found"));
        assert!(matches!(t.status(), RunStatus::Failed { .. }));
    }

    #[test]
    fn elapsed_freezes_at_finish() {
        let mut t = StatusTracker::new();
        t.start();
        t.finish(&ExitOutcome::Exited { code: Some(0) });
        let frozen = t.elapsed();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(t.elapsed(), frozen);
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "02:05");
    }
}
