//! Panel rendering for the main screen.

use super::state::{Field, LogSource, UiState};
use crate::model::{HistoryEntry, RunStatus};
use crate::status::format_elapsed;
use ansi_to_tui::IntoText;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const BORDER: Color = Color::Rgb(0x7d, 0x8c, 0xa3);
const ACCENT: Color = Color::Rgb(0x7d, 0xd3, 0xfc);

pub fn draw(area: Rect, f: &mut Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(
                "  WPScan TUI",
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                "   live output, quick flags, session history",
                Style::default().fg(Color::Gray),
            ),
        ])),
        rows[0],
    );

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(58), Constraint::Percentage(42)])
        .split(rows[1]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Length(10),
        ])
        .split(body[0]);

    draw_status(left[0], f, state);
    draw_log(left[1], f, state);
    draw_history(left[2], f, state);
    draw_form(body[1], f, state);
    draw_footer(rows[2], f, state);
}

fn card(title: &str, focused: bool) -> Block<'static> {
    let border = if focused { Color::Yellow } else { BORDER };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(Span::styled(
            title.to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ))
}

fn status_color(status: &RunStatus) -> Color {
    match status {
        RunStatus::Idle => ACCENT,
        RunStatus::Running | RunStatus::Cancelled => Color::Yellow,
        RunStatus::Completed { exit_code: 0 } => Color::Green,
        RunStatus::Completed { .. } | RunStatus::Failed { .. } => Color::Red,
    }
}

fn draw_status(area: Rect, f: &mut Frame, state: &UiState) {
    let exit = match &state.status {
        RunStatus::Completed { exit_code } => exit_code.to_string(),
        RunStatus::Running => "…".into(),
        _ => "-".into(),
    };
    let chip = Style::default()
        .fg(status_color(&state.status))
        .add_modifier(Modifier::BOLD);
    let info_style = if state.info_is_error {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::Green)
    };

    let mut lines = vec![Line::from(vec![
        Span::styled(format!("Status: {}", state.status.label()), chip),
        Span::raw("   "),
        Span::raw(format!("Elapsed {}", format_elapsed(state.elapsed))),
        Span::raw("   "),
        Span::raw(format!("Exit: {exit}")),
    ])];
    if let RunStatus::Failed { reason } = &state.status {
        lines.push(Line::from(Span::styled(
            reason.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(Span::styled(state.info.clone(), info_style)));

    f.render_widget(Paragraph::new(lines).block(card("Run status", false)), area);
}

fn draw_log(area: Rect, f: &mut Frame, state: &UiState) {
    let title = match &state.log_source {
        LogSource::Live => "Live log".to_string(),
        LogSource::Replay { target, timestamp } => {
            format!("Saved scan: {} ({})", target, format_timestamp(timestamp))
        }
    };

    let visible = (area.height as usize).saturating_sub(2);
    let total = state.log_lines.len();
    let end = total.saturating_sub(state.log_scroll);
    let start = end.saturating_sub(visible);
    let raw = state.log_lines[start..end].join("\n");
    let text: Text = raw
        .as_bytes()
        .into_text()
        .unwrap_or_else(|_| Text::raw(raw.clone()));

    let title = if state.log_scroll > 0 {
        format!("{title} [scrolled {}]", state.log_scroll)
    } else {
        title
    };
    f.render_widget(Paragraph::new(text).block(card(&title, false)), area);
}

fn history_row(idx: usize, e: &HistoryEntry, width: usize) -> String {
    let status = match &e.status {
        RunStatus::Completed { exit_code: 0 } => "ok".to_string(),
        RunStatus::Completed { exit_code } => format!("err {exit_code}"),
        other => other.label(),
    };
    let row = format!(
        "{:02} • {} • {} • {:.0}s • {}",
        idx + 1,
        format_timestamp(&e.timestamp),
        status,
        e.duration_seconds,
        e.target
    );
    row.chars().take(width).collect()
}

fn draw_history(area: Rect, f: &mut Frame, state: &UiState) {
    let focused = state.focus == Field::History;
    let visible = (area.height as usize).saturating_sub(2);
    let width = (area.width as usize).saturating_sub(2);

    let mut lines: Vec<Line> = Vec::new();
    if state.history.is_empty() {
        lines.push(Line::from(Span::styled(
            "No runs yet in this session.",
            Style::default().fg(Color::Gray),
        )));
    }
    let offset = state
        .history_selected
        .saturating_sub(visible.saturating_sub(1));
    for (idx, e) in state
        .history_newest_first()
        .enumerate()
        .skip(offset)
        .take(visible)
    {
        let selected = idx == state.history_selected;
        let style = match (selected, focused) {
            (true, true) => Style::default().fg(Color::Black).bg(Color::Yellow),
            (true, false) => Style::default().add_modifier(Modifier::REVERSED),
            _ => Style::default().fg(status_color(&e.status)),
        };
        lines.push(Line::from(Span::styled(history_row(idx, e, width), style)));
    }

    let title = format!("Session history ({})", state.history.len());
    f.render_widget(Paragraph::new(lines).block(card(&title, focused)), area);
}

fn text_input(f: &mut Frame, area: Rect, state: &UiState, field: Field) {
    let focused = state.focus == field;
    let value = state.text_value(field).unwrap_or_default();
    let shown = if field == Field::Token {
        "•".repeat(value.chars().count())
    } else {
        value.to_string()
    };
    let mut spans = Vec::new();
    if shown.is_empty() && !focused {
        let hint = match field {
            Field::Target => "https://example.com",
            Field::Token => "token",
            _ => "--detection-mode aggressive",
        };
        spans.push(Span::styled(hint, Style::default().fg(Color::DarkGray)));
    } else {
        spans.push(Span::raw(shown));
    }
    if focused {
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(
        Paragraph::new(Line::from(spans)).block(card(field.label(), focused)),
        area,
    );
}

fn checkbox_lines(state: &UiState, fields: &[Field]) -> Vec<Line<'static>> {
    fields
        .iter()
        .map(|field| {
            let checked = state.checkbox(*field).unwrap_or(false);
            let mark = if checked { "[x]" } else { "[ ]" };
            let style = if state.focus == *field {
                Style::default().fg(Color::Black).bg(Color::Yellow)
            } else if checked {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            Line::from(Span::styled(format!("{mark} {}", field.label()), style))
        })
        .collect()
}

fn draw_form(area: Rect, f: &mut Frame, state: &UiState) {
    let checkboxes = Field::CHECKBOXES;
    let (enumerate, flags) = checkboxes.split_at(3);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(enumerate.len() as u16 + 2),
            Constraint::Length(flags.len() as u16 + 2),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    text_input(f, rows[0], state, Field::Target);
    text_input(f, rows[1], state, Field::Token);
    let enum_focused = enumerate.contains(&state.focus);
    f.render_widget(
        Paragraph::new(checkbox_lines(state, enumerate)).block(card("Enumerate", enum_focused)),
        rows[2],
    );
    let flags_focused = flags.contains(&state.focus);
    f.render_widget(
        Paragraph::new(checkbox_lines(state, flags)).block(card("Flags", flags_focused)),
        rows[3],
    );
    text_input(f, rows[4], state, Field::ExtraArgs);
}

fn draw_footer(area: Rect, f: &mut Frame, state: &UiState) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Magenta));
    let run_or_stop = if state.is_running() {
        vec![key("Ctrl-C"), Span::raw(" stop  ")]
    } else {
        vec![key("Ctrl-S"), Span::raw(" run  ")]
    };
    let mut spans = run_or_stop;
    spans.extend([
        key("Tab"),
        Span::raw(" focus  "),
        key("Enter"),
        Span::raw(" replay  "),
        key("Ctrl-L"),
        Span::raw(" clear  "),
        key("F1"),
        Span::raw(" help  "),
        key("Ctrl-Q"),
        Span::raw(" quit"),
    ]);
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// RFC 3339 UTC to local `YYYY-MM-DD HH:MM:SS`; falls back to the raw value.
pub fn format_timestamp(ts: &str) -> String {
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;

    let Ok(parsed) = time::OffsetDateTime::parse(ts, &Rfc3339) else {
        return ts.to_string();
    };
    let local = time::UtcOffset::current_local_offset()
        .map(|off| parsed.to_offset(off))
        .unwrap_or(parsed);
    local
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| ts.to_string())
}
