use crate::history::{self, HistoryStore};
use crate::model::{RunStatus, ScanEvent, ScanOptions};
use crate::orchestrator::{self, Orchestrator, UiCommand};
use crate::runner::ProcessRunner;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Exit code used by shells for SIGINT; reported when a text-mode scan is cancelled.
const EXIT_CANCELLED: i32 = 130;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = stdout.lock();
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                // Scanner chunks carry their own newlines.
                OutputLine::Stdout(chunk) => {
                    let _ = out.write_all(chunk.as_bytes());
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "wpscan-tui",
    version,
    about = "Terminal UI for the WPScan WordPress scanner"
)]
pub struct Cli {
    /// Scanner executable (looked up on PATH)
    #[arg(long, env = "WPSCAN_BIN", default_value = "wpscan")]
    pub wpscan_bin: PathBuf,

    /// Argument placed before the generated ones; repeat for several, e.g.
    /// `--wpscan-bin docker --wpscan-arg run --wpscan-arg --rm --wpscan-arg wpscanteam/wpscan`
    #[arg(long = "wpscan-arg", allow_hyphen_values = true)]
    pub wpscan_args: Vec<String>,

    /// How long a cancelled scan gets to exit after SIGTERM before it is killed
    #[arg(long, default_value = "5s")]
    pub grace_period: humantime::Duration,

    /// Session history file (deleted on exit)
    #[arg(long, env = "WPSCAN_TUI_HISTORY")]
    pub history_file: Option<PathBuf>,

    /// Write logs to this file (TUI mode only logs when this is set)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Run one scan without the TUI, streaming output to stdout
    #[arg(long)]
    pub text: bool,

    /// Target URL
    #[arg(long)]
    pub url: Option<String>,

    /// WPScan API token
    #[arg(long, env = "WPSCAN_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Enumerate users
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub enumerate_users: bool,

    /// Enumerate plugins
    #[arg(long)]
    pub enumerate_plugins: bool,

    /// Enumerate themes
    #[arg(long)]
    pub enumerate_themes: bool,

    /// Use a random user agent
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub random_user_agent: bool,

    /// Pass --verbose to the scanner
    #[arg(long)]
    pub verbose_scan: bool,

    /// Scan even if WordPress is not detected
    #[arg(long)]
    pub force: bool,

    /// Disable TLS certificate checks
    #[arg(long)]
    pub ignore_tls_errors: bool,

    /// Ignore the main redirect
    #[arg(long)]
    pub ignore_main_redirect: bool,

    /// Skip the vulnerability database update
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub no_update: bool,

    /// Ask the scanner for uncoloured output
    #[arg(long)]
    pub plain_output: bool,

    /// Extra scanner arguments, shell-quoted (e.g. "--detection-mode aggressive")
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub extra_args: String,
}

impl Cli {
    /// Scan options pre-filled from the command line.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            target: self.url.clone().unwrap_or_default(),
            api_token: self.api_token.clone(),
            enumerate_users: self.enumerate_users,
            enumerate_plugins: self.enumerate_plugins,
            enumerate_themes: self.enumerate_themes,
            random_user_agent: self.random_user_agent,
            verbose: self.verbose_scan,
            force: self.force,
            ignore_tls_errors: self.ignore_tls_errors,
            ignore_main_redirect: self.ignore_main_redirect,
            no_update: self.no_update,
            plain_output: self.plain_output,
            extra_args: self.extra_args.clone(),
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(history::default_history_path)
    }
}

/// Build the process runner from CLI arguments.
pub fn build_runner(args: &Cli) -> ProcessRunner {
    ProcessRunner::new(args.wpscan_bin.clone())
        .with_leading_args(args.wpscan_args.clone())
        .with_grace_period(args.grace_period.into())
}

/// Build a session orchestrator and subscribe to it before loading history, so the initial
/// listing reaches the returned receiver.
pub fn build_orchestrator(args: &Cli) -> (Orchestrator, mpsc::UnboundedReceiver<ScanEvent>) {
    let mut orch = Orchestrator::new(build_runner(args), HistoryStore::new(args.history_path()));
    let events = orch.subscribe();
    orch.load_history();
    (orch, events)
}

/// Returns the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    if !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await.map(|()| 0);
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    run_text(args).await
}

async fn run_text(args: Cli) -> Result<i32> {
    let (mut orch, mut events) = build_orchestrator(&args);
    tracing::debug!(path = %orch.history().path().display(), "session history file");
    let (out_tx, out_handle) = spawn_output_writer();

    if let Err(e) = orch.start(args.scan_options()) {
        orch.purge_history();
        let _ = out_tx.send(OutputLine::Stderr(format!("error: {e}")));
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(1);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let controller = tokio::spawn(orchestrator::run_controller(orch, cmd_rx));

    let mut exit_code = 1;
    while let Some(ev) = events.recv().await {
        match ev {
            ScanEvent::RunStarted { command, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("$ {command}")));
            }
            ScanEvent::Output { chunk, .. } => {
                let _ = out_tx.send(OutputLine::Stdout(chunk));
            }
            ScanEvent::Info(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(msg));
            }
            ScanEvent::Warning(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("warning: {msg}")));
            }
            ScanEvent::RunFinished { run } => {
                exit_code = match &run.status {
                    RunStatus::Completed { exit_code } => *exit_code,
                    RunStatus::Cancelled => EXIT_CANCELLED,
                    _ => 1,
                };
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Scan {} after {:.1}s",
                    run.status.label(),
                    run.duration_seconds
                )));
                let _ = cmd_tx.send(UiCommand::Quit);
            }
            ScanEvent::Status { .. } | ScanEvent::History { .. } | ScanEvent::Replay { .. } => {}
        }
    }

    controller
        .await
        .context("controller task failed")?
        .context("controller error")?;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(exit_code)
}
