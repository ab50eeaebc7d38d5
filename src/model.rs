use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of everything the user chose for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub target: String,
    // Never written to the history file.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub enumerate_users: bool,
    pub enumerate_plugins: bool,
    pub enumerate_themes: bool,
    pub random_user_agent: bool,
    pub verbose: bool,
    pub force: bool,
    pub ignore_tls_errors: bool,
    pub ignore_main_redirect: bool,
    pub no_update: bool,
    pub plain_output: bool,
    pub extra_args: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            target: String::new(),
            api_token: None,
            enumerate_users: false,
            enumerate_plugins: false,
            enumerate_themes: false,
            random_user_agent: false,
            verbose: false,
            force: false,
            ignore_tls_errors: false,
            ignore_main_redirect: false,
            no_update: true,
            plain_output: false,
            extra_args: String::new(),
        }
    }
}

impl ScanOptions {
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed { exit_code: i32 },
    Failed { reason: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed { .. } | RunStatus::Failed { .. } | RunStatus::Cancelled
        )
    }

    /// Short label for status chips and history rows.
    pub fn label(&self) -> String {
        match self {
            RunStatus::Idle => "idle".into(),
            RunStatus::Running => "running".into(),
            RunStatus::Completed { exit_code: 0 } => "done".into(),
            RunStatus::Completed { exit_code } => format!("exit {exit_code}"),
            RunStatus::Failed { .. } => "failed".into(),
            RunStatus::Cancelled => "cancelled".into(),
        }
    }
}

/// One execution of the scanner, as kept in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRun {
    pub id: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub options: ScanOptions,
    #[serde(default)]
    pub command: String,
    pub output: Vec<String>,
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    pub duration_seconds: f64,
}

impl ScanRun {
    pub fn new(id: String, options: ScanOptions, command: String) -> Self {
        Self {
            id,
            timestamp: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            options,
            command,
            output: Vec::new(),
            exit_code: None,
            status: RunStatus::Running,
            duration_seconds: 0.0,
        }
    }

    pub fn summary(&self) -> HistoryEntry {
        HistoryEntry {
            id: self.id.clone(),
            timestamp: self.timestamp.clone(),
            target: self.options.target.clone(),
            status: self.status.clone(),
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Lightweight view of a history record for list rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: String,
    pub target: String,
    pub status: RunStatus,
    pub duration_seconds: f64,
}

/// Events published by the orchestrator to presentation layers.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    RunStarted {
        id: String,
        command: String,
    },
    Output {
        id: String,
        chunk: String,
    },
    Status {
        status: RunStatus,
        elapsed: Duration,
    },
    RunFinished {
        // Boxed to keep the enum small; a finished run carries its whole output.
        run: Box<ScanRun>,
    },
    /// Full history listing, oldest first.
    History {
        entries: Vec<HistoryEntry>,
    },
    Replay {
        run: Box<ScanRun>,
    },
    Info(String),
    Warning(String),
}
