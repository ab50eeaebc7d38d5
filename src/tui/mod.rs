mod help;
mod panels;
mod state;

use crate::cli::Cli;
use crate::model::{RunStatus, ScanEvent, ScanOptions};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use state::{Field, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

const LOG_PAGE: usize = 10;

pub async fn run(args: Cli) -> Result<()> {
    let (orch, event_rx) = crate::cli::build_orchestrator(&args);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking terminal I/O out of the Tokio runtime.
    let initial = args.scan_options();
    let ui_handle = std::thread::spawn(move || run_threaded(initial, event_rx, cmd_tx));

    let res = orchestrator::run_controller(orch, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// What the loop should do after a key press.
#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Quit,
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    initial: ScanOptions,
    mut event_rx: UnboundedReceiver<ScanEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only.
    let mut state = UiState::with_options(initial);

    let tick_rate = Duration::from_millis(100);
    terminal.draw(|f| draw(f.area(), f, &state)).ok();
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain without blocking; the orchestrator going away ends the session.
        let mut disconnected = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => apply_event(&mut state, ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        if disconnected {
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(&mut state, k, &cmd_tx) == KeyOutcome::Quit {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    panels::draw(area, f, state);
    if state.show_help {
        let w = area.width.min(64);
        let h = area.height.min(20);
        let popup = Rect {
            x: area.x + (area.width - w) / 2,
            y: area.y + (area.height - h) / 2,
            width: w,
            height: h,
        };
        help::draw_help(popup, f);
    }
}

fn handle_key(
    state: &mut UiState,
    k: KeyEvent,
    cmd_tx: &UnboundedSender<UiCommand>,
) -> KeyOutcome {
    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
    match (ctrl, k.code) {
        (true, KeyCode::Char('q')) => {
            let _ = cmd_tx.send(UiCommand::Quit);
            return KeyOutcome::Quit;
        }
        (true, KeyCode::Char('s')) => {
            let _ = cmd_tx.send(UiCommand::Start(state.scan_options()));
        }
        (true, KeyCode::Char('c')) | (_, KeyCode::Esc) => {
            if state.show_help {
                state.show_help = false;
            } else if !ctrl && state.leave_replay() {
                state.set_info("Back to live log");
            } else if state.is_running() {
                let _ = cmd_tx.send(UiCommand::Cancel);
            } else if ctrl {
                state.set_info("No scan is running");
            }
        }
        (true, KeyCode::Char('l')) => {
            let _ = cmd_tx.send(UiCommand::ClearHistory);
        }
        (true, KeyCode::Char('y')) => match copy_to_clipboard(&state.log_text()) {
            Ok(()) => state.set_info("✓ Log copied to clipboard"),
            Err(e) => state.set_error(format!("Clipboard unavailable: {e:#}")),
        },
        (_, KeyCode::F(1)) => state.show_help = !state.show_help,
        (_, KeyCode::Tab) => state.focus = state.focus.next(),
        (_, KeyCode::BackTab) => state.focus = state.focus.prev(),
        (_, KeyCode::PageUp) => state.scroll_log_up(LOG_PAGE),
        (_, KeyCode::PageDown) => state.scroll_log_down(LOG_PAGE),
        (false, code) => handle_field_key(state, code, cmd_tx),
        _ => {}
    }
    KeyOutcome::Continue
}

/// Keys whose meaning depends on the focused widget.
fn handle_field_key(state: &mut UiState, code: KeyCode, cmd_tx: &UnboundedSender<UiCommand>) {
    let focus = state.focus;
    if focus == Field::History {
        match code {
            KeyCode::Up | KeyCode::Char('k') => state.history_up(),
            KeyCode::Down | KeyCode::Char('j') => state.history_down(),
            KeyCode::Enter | KeyCode::Char('v') => match state.selected_history_id() {
                Some(id) => {
                    let _ = cmd_tx.send(UiCommand::Replay(id));
                }
                None => state.set_info("No saved scans yet"),
            },
            KeyCode::Char('?') => state.show_help = !state.show_help,
            _ => {}
        }
    } else if focus.is_text() {
        match code {
            KeyCode::Char(c) => state.type_char(c),
            KeyCode::Backspace => state.backspace(),
            KeyCode::Enter => {
                let _ = cmd_tx.send(UiCommand::Start(state.scan_options()));
            }
            KeyCode::Down => state.focus = focus.next(),
            KeyCode::Up => state.focus = focus.prev(),
            _ => {}
        }
    } else {
        match code {
            KeyCode::Char(' ') | KeyCode::Enter => state.toggle(focus),
            KeyCode::Down | KeyCode::Char('j') => state.focus = focus.next(),
            KeyCode::Up | KeyCode::Char('k') => state.focus = focus.prev(),
            KeyCode::Char('?') => state.show_help = !state.show_help,
            _ => {}
        }
    }
}

fn apply_event(state: &mut UiState, ev: ScanEvent) {
    match ev {
        ScanEvent::RunStarted { command, .. } => {
            state.begin_live_log(&command);
            state.set_info("Scan started");
        }
        ScanEvent::Output { chunk, .. } => state.push_live_chunk(&chunk),
        ScanEvent::Status { status, elapsed } => {
            state.status = status;
            state.elapsed = elapsed;
        }
        ScanEvent::RunFinished { run } => {
            let msg = format!(
                "Scan {} after {:.1}s: {}",
                run.status.label(),
                run.duration_seconds,
                run.options.target
            );
            match run.status {
                RunStatus::Completed { exit_code: 0 } | RunStatus::Cancelled => {
                    state.set_info(msg)
                }
                _ => state.set_error(msg),
            }
        }
        ScanEvent::History { entries } => state.set_history(entries),
        ScanEvent::Replay { run } => {
            state.show_replay(&run);
            state.set_info(format!(
                "Loaded saved scan for {} ({})",
                run.options.target,
                panels::format_timestamp(&run.timestamp)
            ));
        }
        ScanEvent::Info(msg) => state.set_info(msg),
        ScanEvent::Warning(msg) => state.set_error(msg),
    }
}

// Global clipboard manager channel, initialized on first use.
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Start the clipboard thread if needed. Each copy holds its clipboard instance for a while so
/// Linux clipboard managers can read the contents.
fn init_clipboard_manager() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                match Clipboard::new() {
                    Ok(mut clipboard) => {
                        if let Err(e) = clipboard.set_text(&text) {
                            tracing::warn!(error = %e, "clipboard write failed");
                        } else {
                            std::thread::sleep(Duration::from_secs(2));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
                }
            }
        });
        tx
    })
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    init_clipboard_manager()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard manager channel closed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HistoryEntry, ScanRun};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn drain(rx: &mut UnboundedReceiver<UiCommand>) -> Vec<UiCommand> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn typing_then_ctrl_s_starts_with_form_values() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        for c in "https://example.com".chars() {
            handle_key(&mut state, key(KeyCode::Char(c)), &tx);
        }
        assert_eq!(handle_key(&mut state, ctrl('s'), &tx), KeyOutcome::Continue);
        match drain(&mut rx).as_slice() {
            [UiCommand::Start(opts)] => assert_eq!(opts.target, "https://example.com"),
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    fn ctrl_c_cancels_only_while_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        handle_key(&mut state, ctrl('c'), &tx);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(state.info, "No scan is running");

        state.status = RunStatus::Running;
        handle_key(&mut state, ctrl('c'), &tx);
        assert!(matches!(drain(&mut rx).as_slice(), [UiCommand::Cancel]));
    }

    #[test]
    fn ctrl_q_quits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        assert_eq!(handle_key(&mut state, ctrl('q'), &tx), KeyOutcome::Quit);
        assert!(matches!(drain(&mut rx).as_slice(), [UiCommand::Quit]));
    }

    #[test]
    fn space_toggles_focused_checkbox() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.focus = Field::EnumPlugins;
        handle_key(&mut state, key(KeyCode::Char(' ')), &tx);
        assert!(state.options.enumerate_plugins);
        assert_eq!(state.options.target, "");
    }

    #[test]
    fn enter_on_history_requests_replay_of_newest() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.set_history(vec![
            HistoryEntry {
                id: "old".into(),
                timestamp: "t".into(),
                target: "a".into(),
                status: RunStatus::Cancelled,
                duration_seconds: 1.0,
            },
            HistoryEntry {
                id: "new".into(),
                timestamp: "t".into(),
                target: "b".into(),
                status: RunStatus::Completed { exit_code: 0 },
                duration_seconds: 1.0,
            },
        ]);
        state.focus = Field::History;
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        match drain(&mut rx).as_slice() {
            [UiCommand::Replay(id)] => assert_eq!(id, "new"),
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    fn esc_returns_from_a_replay_to_the_live_log() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.status = RunStatus::Running;
        let mut run = ScanRun::new(
            "r1".into(),
            ScanOptions::with_target("https://old.example"),
            "wpscan --url https://old.example".into(),
        );
        run.output.push("saved line\n".into());
        apply_event(&mut state, ScanEvent::Replay { run: Box::new(run) });
        apply_event(
            &mut state,
            ScanEvent::Output {
                id: "r2".into(),
                chunk: "live line\n".into(),
            },
        );
        assert!(state.log_text().contains("saved line"));
        assert!(!state.log_text().contains("live line"));

        // First Esc leaves the replay without stopping the scan; the next one cancels.
        handle_key(&mut state, key(KeyCode::Esc), &tx);
        assert!(drain(&mut rx).is_empty());
        assert!(state.log_text().contains("live line"));
        assert!(!state.log_text().contains("saved line"));
        handle_key(&mut state, key(KeyCode::Esc), &tx);
        assert!(matches!(drain(&mut rx).as_slice(), [UiCommand::Cancel]));

        apply_event(
            &mut state,
            ScanEvent::RunStarted {
                id: "r3".into(),
                command: "wpscan --url https://new.example".into(),
            },
        );
        apply_event(
            &mut state,
            ScanEvent::Output {
                id: "r3".into(),
                chunk: "fresh\n".into(),
            },
        );
        assert!(state.log_text().contains("fresh"));
        assert!(!state.log_text().contains("live line"));
    }

    #[test]
    fn warnings_are_shown_as_errors() {
        let mut state = UiState::default();
        apply_event(&mut state, ScanEvent::Warning("a scan is already running".into()));
        assert!(state.info_is_error);
        apply_event(&mut state, ScanEvent::Info("History cleared".into()));
        assert!(!state.info_is_error);
    }
}
