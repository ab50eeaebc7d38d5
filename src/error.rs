//! Error taxonomy for scan orchestration.
//!
//! `ScanError` covers everything that can stop a run from starting. History I/O problems are
//! reported separately as `PersistenceWarning` because they never abort a run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// No target URL was supplied.
    #[error("enter a target URL before running")]
    Validation,

    /// The extra-arguments string could not be tokenized (unbalanced quotes).
    #[error("extra arguments are malformed (check quotes): {0}")]
    ExtraArgs(String),

    /// The scanner binary could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A run is already in progress.
    #[error("a scan is already running")]
    Busy,
}

/// Non-fatal failure while writing or deleting the history file.
#[derive(Debug, Error)]
#[error("history {action} failed for {}: {source}", path.display())]
pub struct PersistenceWarning {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl PersistenceWarning {
    pub fn new(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            action,
            path: path.into(),
            source,
        }
    }
}
