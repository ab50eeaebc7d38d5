use crate::model::{HistoryEntry, RunStatus, ScanOptions, ScanRun};
use std::time::Duration;

const MAX_LOG_LINES: usize = 5000;

/// Focusable widgets, in Tab order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Target,
    Token,
    EnumUsers,
    EnumPlugins,
    EnumThemes,
    RandomUserAgent,
    Verbose,
    IgnoreMainRedirect,
    NoUpdate,
    IgnoreTls,
    Force,
    PlainOutput,
    ExtraArgs,
    History,
}

impl Field {
    const ORDER: [Field; 14] = [
        Field::Target,
        Field::Token,
        Field::EnumUsers,
        Field::EnumPlugins,
        Field::EnumThemes,
        Field::RandomUserAgent,
        Field::Verbose,
        Field::IgnoreMainRedirect,
        Field::NoUpdate,
        Field::IgnoreTls,
        Field::Force,
        Field::PlainOutput,
        Field::ExtraArgs,
        Field::History,
    ];

    pub const CHECKBOXES: [Field; 10] = [
        Field::EnumUsers,
        Field::EnumPlugins,
        Field::EnumThemes,
        Field::RandomUserAgent,
        Field::Verbose,
        Field::IgnoreMainRedirect,
        Field::NoUpdate,
        Field::IgnoreTls,
        Field::Force,
        Field::PlainOutput,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        let n = Self::ORDER.len();
        Self::ORDER[(self.index() + n - 1) % n]
    }

    pub fn is_text(self) -> bool {
        matches!(self, Field::Target | Field::Token | Field::ExtraArgs)
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Target => "Target",
            Field::Token => "API token (optional)",
            Field::EnumUsers => "Users",
            Field::EnumPlugins => "Plugins",
            Field::EnumThemes => "Themes",
            Field::RandomUserAgent => "Random user-agent",
            Field::Verbose => "Verbose output",
            Field::IgnoreMainRedirect => "Ignore main redirect",
            Field::NoUpdate => "Skip DB update (--no-update)",
            Field::IgnoreTls => "Ignore TLS errors",
            Field::Force => "Force even if WP not detected",
            Field::PlainOutput => "Plain output (no colour)",
            Field::ExtraArgs => "Extra arguments (advanced)",
            Field::History => "Session history",
        }
    }
}

/// What the log panel is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    Live,
    Replay { target: String, timestamp: String },
}

pub struct UiState {
    pub options: ScanOptions,
    pub token_input: String,
    pub focus: Field,

    pub status: RunStatus,
    pub elapsed: Duration,
    pub info: String,
    pub info_is_error: bool,

    pub log_lines: Vec<String>,
    pub log_source: LogSource,
    /// Lines scrolled up from the bottom; 0 follows the tail.
    pub log_scroll: usize,
    /// Live log set aside while a replay is on screen; keeps receiving output.
    live_stash: Option<Vec<String>>,

    /// Oldest first, as published by the orchestrator.
    pub history: Vec<HistoryEntry>,
    /// Index into the newest-first display order.
    pub history_selected: usize,

    pub show_help: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            options: ScanOptions::default(),
            token_input: String::new(),
            focus: Field::Target,
            status: RunStatus::Idle,
            elapsed: Duration::ZERO,
            info: "Ready".into(),
            info_is_error: false,
            log_lines: Vec::new(),
            log_source: LogSource::Live,
            log_scroll: 0,
            live_stash: None,
            history: Vec::new(),
            history_selected: 0,
            show_help: false,
        }
    }
}

impl UiState {
    pub fn with_options(mut options: ScanOptions) -> Self {
        let token_input = options.api_token.take().unwrap_or_default();
        Self {
            options,
            token_input,
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Snapshot the form for a new run.
    pub fn scan_options(&self) -> ScanOptions {
        let token = self.token_input.trim();
        ScanOptions {
            api_token: (!token.is_empty()).then(|| token.to_string()),
            ..self.options.clone()
        }
    }

    pub fn set_info(&mut self, msg: impl Into<String>) {
        self.info = msg.into();
        self.info_is_error = false;
    }

    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.info = msg.into();
        self.info_is_error = true;
    }

    pub fn checkbox(&self, field: Field) -> Option<bool> {
        let o = &self.options;
        Some(match field {
            Field::EnumUsers => o.enumerate_users,
            Field::EnumPlugins => o.enumerate_plugins,
            Field::EnumThemes => o.enumerate_themes,
            Field::RandomUserAgent => o.random_user_agent,
            Field::Verbose => o.verbose,
            Field::IgnoreMainRedirect => o.ignore_main_redirect,
            Field::NoUpdate => o.no_update,
            Field::IgnoreTls => o.ignore_tls_errors,
            Field::Force => o.force,
            Field::PlainOutput => o.plain_output,
            _ => return None,
        })
    }

    pub fn toggle(&mut self, field: Field) {
        let o = &mut self.options;
        let flag = match field {
            Field::EnumUsers => &mut o.enumerate_users,
            Field::EnumPlugins => &mut o.enumerate_plugins,
            Field::EnumThemes => &mut o.enumerate_themes,
            Field::RandomUserAgent => &mut o.random_user_agent,
            Field::Verbose => &mut o.verbose,
            Field::IgnoreMainRedirect => &mut o.ignore_main_redirect,
            Field::NoUpdate => &mut o.no_update,
            Field::IgnoreTls => &mut o.ignore_tls_errors,
            Field::Force => &mut o.force,
            Field::PlainOutput => &mut o.plain_output,
            _ => return,
        };
        *flag = !*flag;
    }

    pub fn text_value(&self, field: Field) -> Option<&str> {
        match field {
            Field::Target => Some(&self.options.target),
            Field::Token => Some(&self.token_input),
            Field::ExtraArgs => Some(&self.options.extra_args),
            _ => None,
        }
    }

    fn text_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::Target => Some(&mut self.options.target),
            Field::Token => Some(&mut self.token_input),
            Field::ExtraArgs => Some(&mut self.options.extra_args),
            _ => None,
        }
    }

    pub fn type_char(&mut self, c: char) {
        if let Some(s) = self.text_mut(self.focus) {
            s.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if let Some(s) = self.text_mut(self.focus) {
            s.pop();
        }
    }

    /// Start a fresh live log for a new run.
    pub fn begin_live_log(&mut self, header: &str) {
        self.log_lines.clear();
        self.log_lines.push(format!("$ {header}"));
        self.log_lines.push(String::new());
        self.log_source = LogSource::Live;
        self.log_scroll = 0;
        self.live_stash = None;
    }

    /// Append an arbitrary chunk to the displayed log; a chunk may end mid-line.
    pub fn push_chunk(&mut self, chunk: &str) {
        append_chunk(&mut self.log_lines, chunk);
    }

    /// Append live scanner output, wherever the live log currently is.
    pub fn push_live_chunk(&mut self, chunk: &str) {
        match self.live_stash.as_mut() {
            Some(stash) => append_chunk(stash, chunk),
            None => append_chunk(&mut self.log_lines, chunk),
        }
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self.log_source, LogSource::Replay { .. })
    }

    /// Replace the log with a stored run's buffer, setting the live log aside.
    pub fn show_replay(&mut self, run: &ScanRun) {
        let previous = std::mem::take(&mut self.log_lines);
        if self.live_stash.is_none() {
            self.live_stash = Some(previous);
        }
        self.log_lines.push(format!("$ {}", run.command));
        self.log_lines.push(String::new());
        for chunk in &run.output {
            self.push_chunk(chunk);
        }
        self.log_source = LogSource::Replay {
            target: run.options.target.clone(),
            timestamp: run.timestamp.clone(),
        };
        self.log_scroll = 0;
    }

    /// Back to the live log after a replay. Returns false if no replay was shown.
    pub fn leave_replay(&mut self) -> bool {
        if !self.is_replaying() {
            return false;
        }
        self.log_lines = self.live_stash.take().unwrap_or_default();
        self.log_source = LogSource::Live;
        self.log_scroll = 0;
        true
    }

    pub fn set_history(&mut self, entries: Vec<HistoryEntry>) {
        self.history = entries;
        if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len().saturating_sub(1);
        }
    }

    /// History in display order (newest first).
    pub fn history_newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter().rev()
    }

    pub fn selected_history_id(&self) -> Option<String> {
        self.history_newest_first()
            .nth(self.history_selected)
            .map(|e| e.id.clone())
    }

    pub fn history_up(&mut self) {
        self.history_selected = self.history_selected.saturating_sub(1);
    }

    pub fn history_down(&mut self) {
        if self.history_selected + 1 < self.history.len() {
            self.history_selected += 1;
        }
    }

    pub fn scroll_log_up(&mut self, lines: usize) {
        let max = self.log_lines.len().saturating_sub(1);
        self.log_scroll = (self.log_scroll + lines).min(max);
    }

    pub fn scroll_log_down(&mut self, lines: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(lines);
    }

    /// Raw log text, for the clipboard.
    pub fn log_text(&self) -> String {
        self.log_lines.join("\n")
    }
}

fn append_chunk(lines: &mut Vec<String>, chunk: &str) {
    if lines.is_empty() {
        lines.push(String::new());
    }
    let mut pieces = chunk.split('\n');
    if let (Some(first), Some(last)) = (pieces.next(), lines.last_mut()) {
        last.push_str(&first.replace('\r', ""));
    }
    for piece in pieces {
        lines.push(piece.replace('\r', ""));
    }
    if lines.len() > MAX_LOG_LINES {
        let _ = lines.drain(0..(lines.len() - MAX_LOG_LINES));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            id: id.into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            target: format!("https://{id}.example"),
            status: RunStatus::Completed { exit_code: 0 },
            duration_seconds: 1.0,
        }
    }

    #[test]
    fn chunks_split_mid_line_are_joined() {
        let mut s = UiState::default();
        s.push_chunk("[+] URL: ht");
        s.push_chunk("tps://example.com\r\n[+] Started");
        s.push_chunk("\n");
        assert_eq!(
            s.log_lines,
            ["[+] URL: https://example.com", "[+] Started", ""]
        );
    }

    #[test]
    fn live_output_keeps_flowing_behind_a_replay() {
        let mut s = UiState::default();
        s.begin_live_log("wpscan --url https://live.example");
        s.push_live_chunk("[+] first\n");

        let mut run = ScanRun::new(
            "old".into(),
            ScanOptions::with_target("https://old.example"),
            "wpscan --url https://old.example".into(),
        );
        run.output.push("saved\n".into());
        s.show_replay(&run);
        s.push_live_chunk("[+] second\n");
        assert!(s.is_replaying());
        assert!(s.log_text().contains("saved"));
        assert!(!s.log_text().contains("second"));

        // A second replay must not lose the stashed live log.
        s.show_replay(&run);
        assert!(s.leave_replay());
        assert!(!s.is_replaying());
        let text = s.log_text();
        assert!(text.contains("[+] first"));
        assert!(text.contains("[+] second"));
        assert!(!text.contains("saved"));
        assert!(!s.leave_replay());
    }

    #[test]
    fn log_is_capped() {
        let mut s = UiState::default();
        for i in 0..(MAX_LOG_LINES + 10) {
            s.push_chunk(&format!("line {i}\n"));
        }
        assert_eq!(s.log_lines.len(), MAX_LOG_LINES);
    }

    #[test]
    fn token_only_set_when_non_blank() {
        let mut s = UiState::with_options(ScanOptions::with_target("https://example.com"));
        assert_eq!(s.scan_options().api_token, None);
        s.focus = Field::Token;
        for c in "abc".chars() {
            s.type_char(c);
        }
        assert_eq!(s.scan_options().api_token.as_deref(), Some("abc"));
        s.backspace();
        assert_eq!(s.token_input, "ab");
    }

    #[test]
    fn focus_cycles_through_all_fields() {
        let mut f = Field::Target;
        for _ in 0..Field::ORDER.len() {
            f = f.next();
        }
        assert_eq!(f, Field::Target);
        assert_eq!(Field::Target.prev(), Field::History);
    }

    #[test]
    fn toggling_checkboxes() {
        let mut s = UiState::default();
        assert_eq!(s.checkbox(Field::NoUpdate), Some(true));
        s.toggle(Field::NoUpdate);
        assert!(!s.scan_options().no_update);
        assert_eq!(s.checkbox(Field::Target), None);
    }

    #[test]
    fn history_selection_is_newest_first() {
        let mut s = UiState::default();
        s.set_history(vec![entry("a"), entry("b"), entry("c")]);
        assert_eq!(s.selected_history_id().as_deref(), Some("c"));
        s.history_down();
        s.history_down();
        s.history_down();
        assert_eq!(s.selected_history_id().as_deref(), Some("a"));
        s.set_history(vec![entry("a")]);
        assert_eq!(s.history_selected, 0);
        s.set_history(Vec::new());
        assert_eq!(s.selected_history_id(), None);
    }
}
