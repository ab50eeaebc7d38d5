use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad.saturating_sub(key.chars().count()))),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("Ctrl-S", 14, "Run scan"),
        key_line("Ctrl-C / Esc", 14, "Stop scan"),
        key_line("Ctrl-Q", 14, "Quit (history is deleted)"),
        key_line("Tab / S-Tab", 14, "Move focus"),
        key_line("Space", 14, "Toggle checkbox"),
        key_line("PgUp / PgDn", 14, "Scroll log"),
        key_line("Ctrl-Y", 14, "Copy log to clipboard"),
        key_line("F1", 14, "Toggle this help"),
        Line::from(""),
        Line::from("Session history:"),
        key_line("↑/↓ or j/k", 14, "Select run"),
        key_line("Enter / v", 14, "Replay selected run"),
        key_line("Esc", 14, "Back to the live log"),
        key_line("Ctrl-L", 14, "Clear history"),
        Line::from(""),
        Line::from(Span::styled(
            "History only lives for this session and is removed on exit.",
            Style::default().fg(Color::Gray),
        )),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
