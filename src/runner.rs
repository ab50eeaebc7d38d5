//! Child process supervision for the scanner binary.
//!
//! `ProcessRunner::start` spawns the program, forwards stdout and stderr as text chunks on a
//! single channel in the order they are read, and finishes with exactly one `Exit` event once
//! both streams have drained. Cancellation is SIGTERM to the child's process group, a bounded
//! grace period, then SIGKILL.

use crate::error::ScanError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const KILL_WAIT: Duration = Duration::from_secs(2);
const READ_BUF: usize = 8192;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own. `code` is `None` when it died from a signal we did not send.
    Exited { code: Option<i32> },
    /// The run was cancelled through its `RunHandle`.
    Cancelled,
}

impl ExitOutcome {
    fn from_wait(res: std::io::Result<ExitStatus>) -> Self {
        match res {
            Ok(status) => ExitOutcome::Exited {
                code: status.code(),
            },
            Err(e) => {
                tracing::warn!("waiting for scanner failed: {e}");
                ExitOutcome::Exited { code: None }
            }
        }
    }
}

#[derive(Debug)]
pub enum RunnerEvent {
    Chunk(String),
    /// Always the last event of a run.
    Exit(ExitOutcome),
}

/// Spawns and supervises scanner processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    leading_args: Vec<String>,
    grace: Duration,
    drain_timeout: Duration,
}

/// Control handle for a started run. Dropping it cancels the run.
#[derive(Debug)]
pub struct RunHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl RunHandle {
    /// Request termination. Returns false if cancel was already requested or the run is over.
    pub fn cancel(&mut self) -> bool {
        match self.cancel_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            grace: DEFAULT_GRACE_PERIOD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Arguments placed before every generated argv, e.g. `run --rm wpscanteam/wpscan` when
    /// the program is `docker`.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_drain_timeout(mut self, drain: Duration) -> Self {
        self.drain_timeout = drain;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn leading_args(&self) -> &[String] {
        &self.leading_args
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Upper bound between a cancel request and the `Exit` event.
    pub fn shutdown_budget(&self) -> Duration {
        self.grace + KILL_WAIT + self.drain_timeout
    }

    /// Spawn the scanner with `argv`. Spawn errors are returned before any event is sent.
    pub fn start(
        &self,
        argv: &[String],
        events: UnboundedSender<RunnerEvent>,
    ) -> Result<RunHandle, ScanError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a cancel reaches anything the scanner forks.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ScanError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        tracing::info!(pid = ?child.id(), program = %self.program.display(), "scanner started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, events.clone()));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let runner = self.clone();
        tokio::spawn(async move {
            runner.supervise(child, readers, cancel_rx, events).await;
        });

        Ok(RunHandle {
            cancel_tx: Some(cancel_tx),
        })
    }

    async fn supervise(
        self,
        mut child: Child,
        readers: Vec<JoinHandle<()>>,
        mut cancel_rx: oneshot::Receiver<()>,
        events: UnboundedSender<RunnerEvent>,
    ) {
        // The child leads its own group, so its pid is the group id even after it is reaped.
        let pgid = child.id();
        let mut cancelled = false;
        let mut outcome = tokio::select! {
            res = child.wait() => ExitOutcome::from_wait(res),
            // A dropped handle counts as a cancel request.
            _ = &mut cancel_rx => {
                cancelled = true;
                self.terminate(&mut child, pgid).await;
                ExitOutcome::Cancelled
            }
        };

        // Descendants can keep the pipes open after the child exits. A cancel still applies to
        // them, and the drain is bounded either way.
        let aborts: Vec<_> = readers.iter().map(|h| h.abort_handle()).collect();
        let drain = async {
            for reader in readers {
                let _ = reader.await;
            }
        };
        tokio::pin!(drain);
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut drain => break,
                _ = &mut cancel_rx, if !cancelled => {
                    cancelled = true;
                    outcome = ExitOutcome::Cancelled;
                    tracing::info!("cancel during output drain, stopping descendants");
                    signal_group(pgid, GroupSignal::Terminate);
                    deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.grace);
                }
                _ = &mut deadline => {
                    tracing::warn!("scanner output did not close after exit; killing its group");
                    signal_group(pgid, GroupSignal::Kill);
                    for abort in &aborts {
                        abort.abort();
                    }
                    break;
                }
            }
        }

        tracing::info!(?outcome, "scanner finished");
        let _ = events.send(RunnerEvent::Exit(outcome));
    }

    async fn terminate(&self, child: &mut Child, pgid: Option<u32>) {
        signal_group(pgid, GroupSignal::Terminate);
        #[cfg(not(unix))]
        let _ = child.start_kill();
        if timeout(self.grace, child.wait()).await.is_ok() {
            return;
        }

        tracing::warn!(
            grace_ms = self.grace.as_millis() as u64,
            "scanner ignored SIGTERM, killing"
        );
        signal_group(pgid, GroupSignal::Kill);
        let _ = child.start_kill();
        let _ = timeout(KILL_WAIT, child.wait()).await;
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, sig: GroupSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pgid else {
        return;
    };
    let signal = match sig {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        tracing::debug!("killpg({pid}, {signal}) failed: {e}");
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _sig: GroupSignal) {}

fn spawn_reader<R>(mut stream: R, events: UnboundedSender<RunnerEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let text = decode_available(&mut pending);
                    if !text.is_empty() && events.send(RunnerEvent::Chunk(text)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("reading scanner output failed: {e}");
                    break;
                }
            }
        }
        if !pending.is_empty() {
            let _ = events.send(RunnerEvent::Chunk(
                String::from_utf8_lossy(&pending).into_owned(),
            ));
        }
    })
}

/// Decode as much of `pending` as possible, keeping an incomplete trailing UTF-8 sequence for
/// the next read.
fn decode_available(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let out = s.to_owned();
            pending.clear();
            out
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new("/bin/sh")
            .with_grace_period(Duration::from_millis(300))
            .with_drain_timeout(Duration::from_millis(500))
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<RunnerEvent>) -> (String, ExitOutcome) {
        let mut output = String::new();
        loop {
            match rx.recv().await {
                Some(RunnerEvent::Chunk(c)) => output.push_str(&c),
                Some(RunnerEvent::Exit(outcome)) => return (output, outcome),
                None => panic!("channel closed without exit event"),
            }
        }
    }

    #[tokio::test]
    async fn merges_both_streams_and_reports_exit_code() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = runner()
            .start(&sh("echo out; echo err 1>&2; exit 3"), tx)
            .unwrap();
        let (output, outcome) = timeout(Duration::from_secs(10), collect(&mut rx))
            .await
            .unwrap();
        assert!(output.contains("out\n"));
        assert!(output.contains("err\n"));
        assert_eq!(outcome, ExitOutcome::Exited { code: Some(3) });
    }

    #[tokio::test]
    async fn exit_is_the_last_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = runner().start(&sh("printf 'a\\nb\\nc\\n'"), tx).unwrap();
        let (output, outcome) = collect(&mut rx).await;
        assert_eq!(output, "a\nb\nc\n");
        assert_eq!(outcome, ExitOutcome::Exited { code: Some(0) });
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn missing_binary_fails_synchronously() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let res = ProcessRunner::new("/nonexistent/wpscan").start(&[], tx);
        assert!(matches!(res, Err(ScanError::Spawn { .. })));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_a_cooperative_child() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = runner().start(&sh("sleep 30"), tx).unwrap();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        let (_, outcome) = timeout(Duration::from_secs(5), collect(&mut rx))
            .await
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_kills_a_child_that_ignores_sigterm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let r = runner();
        let mut handle = r
            .start(
                &sh("trap '' TERM; echo ready; while true; do sleep 1; done"),
                tx,
            )
            .unwrap();

        match rx.recv().await {
            Some(RunnerEvent::Chunk(c)) => assert!(c.contains("ready")),
            other => panic!("unexpected event: {other:?}"),
        }
        handle.cancel();
        let (_, outcome) = timeout(r.shutdown_budget() + Duration::from_secs(1), collect(&mut rx))
            .await
            .expect("cancel exceeded its budget");
        assert_eq!(outcome, ExitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_after_exit_is_a_no_op() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = runner().start(&sh("true"), tx).unwrap();
        let (_, outcome) = collect(&mut rx).await;
        assert_eq!(outcome, ExitOutcome::Exited { code: Some(0) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.cancel());
    }

    fn straggler_script(marker: &std::path::Path) -> String {
        format!(
            "(sleep 1; touch '{}') & echo started; exit 0",
            marker.display()
        )
    }

    #[tokio::test]
    async fn cancel_while_descendants_hold_the_pipes_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("alive");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let r = runner();
        let mut handle = r.start(&sh(&straggler_script(&marker)), tx).unwrap();

        match rx.recv().await {
            Some(RunnerEvent::Chunk(c)) => assert!(c.contains("started")),
            other => panic!("unexpected event: {other:?}"),
        }
        // The shell has exited by now; only the background job keeps output open.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.cancel());

        let (_, outcome) = timeout(r.shutdown_budget(), collect(&mut rx))
            .await
            .expect("cancel exceeded its budget");
        assert_eq!(outcome, ExitOutcome::Cancelled);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived the run");
    }

    #[tokio::test]
    async fn drain_timeout_kills_lingering_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("alive");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = runner().start(&sh(&straggler_script(&marker)), tx).unwrap();

        let (output, outcome) = timeout(Duration::from_secs(5), collect(&mut rx))
            .await
            .unwrap();
        assert_eq!(output, "started\n");
        assert_eq!(outcome, ExitOutcome::Exited { code: Some(0) });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background job outlived the run");
    }
}
