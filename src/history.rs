//! Session-scoped run history.
//!
//! Runs are kept oldest first and capped at `HISTORY_CAPACITY`; the 51st record evicts the
//! oldest. The backing JSON file only lives for one session: it is removed on clear and on
//! every normal exit path.

use crate::args::redact_extra_args;
use crate::error::PersistenceWarning;
use crate::model::ScanRun;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const HISTORY_CAPACITY: usize = 50;
const APP_DIR: &str = "wpscan-tui";
const FILE_NAME: &str = "history.json";

/// `$XDG_STATE_HOME/wpscan-tui/history.json`, falling back to `~/.local/state`.
pub fn default_history_path() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(FILE_NAME)
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<ScanRun>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Oldest first.
    pub fn list(&self) -> &[ScanRun] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&ScanRun> {
        self.entries.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read the session file if one exists. A missing file is the normal case.
    ///
    /// A corrupt file leaves the store empty and is reported as a warning.
    pub fn load(&mut self) -> Result<(), PersistenceWarning> {
        self.entries.clear();
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PersistenceWarning::new("read", &self.path, e)),
        };
        let mut runs: Vec<ScanRun> = serde_json::from_str(&data).map_err(|e| {
            let source = std::io::Error::new(ErrorKind::InvalidData, e);
            PersistenceWarning::new("parse", &self.path, source)
        })?;
        if runs.len() > HISTORY_CAPACITY {
            runs.drain(..runs.len() - HISTORY_CAPACITY);
        }
        self.entries = runs;
        Ok(())
    }

    /// Append a finalized run, evict beyond capacity, then persist.
    ///
    /// Token values are stripped first, wherever they were typed. The in-memory list is updated
    /// even when the write fails.
    pub fn record(&mut self, mut run: ScanRun) -> Result<(), PersistenceWarning> {
        run.options.api_token = None;
        run.options.extra_args = redact_extra_args(&run.options.extra_args);
        self.entries.push(run);
        if self.entries.len() > HISTORY_CAPACITY {
            let overflow = self.entries.len() - HISTORY_CAPACITY;
            self.entries.drain(..overflow);
        }
        self.save()
    }

    /// User-requested wipe of the session history.
    pub fn clear(&mut self) -> Result<(), PersistenceWarning> {
        self.entries.clear();
        remove_history_file(&self.path)
    }

    /// End-of-session teardown. Safe to call more than once.
    pub fn purge(&mut self) -> Result<(), PersistenceWarning> {
        let dropped = self.entries.len();
        self.entries.clear();
        remove_history_file(&self.path)?;
        tracing::debug!(dropped, path = %self.path.display(), "history purged");
        Ok(())
    }

    fn save(&self) -> Result<(), PersistenceWarning> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceWarning::new("write", &self.path, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| {
            let source = std::io::Error::new(ErrorKind::InvalidData, e);
            PersistenceWarning::new("write", &self.path, source)
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                PersistenceWarning::new("write", &self.path, e)
            })
    }
}

/// Delete the history file; a file that is already gone is fine.
pub fn remove_history_file(path: &Path) -> Result<(), PersistenceWarning> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PersistenceWarning::new("delete", path, e)),
    }
}

/// Removes the session file when dropped, covering early returns and panics that unwind.
#[derive(Debug)]
pub struct PurgeOnDrop {
    path: PathBuf,
}

impl PurgeOnDrop {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Drop for PurgeOnDrop {
    fn drop(&mut self) {
        if let Err(e) = remove_history_file(&self.path) {
            tracing::warn!("{e}");
        }
    }
}
