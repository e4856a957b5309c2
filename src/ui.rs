use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};

use crate::{
    app::{App, Field},
    format,
    peer::Role,
};

const HORIZONTAL_MARGIN: u16 = 2;

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .constraints([
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

        let readout = match self.role() {
            Role::Primary => primary_lines(self),
            Role::Secondary => secondary_lines(self),
        };
        Paragraph::new(readout)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title(self.role())),
            )
            .render(chunks[0], buf);

        if let Some(notice) = &self.notice {
            Paragraph::new(Span::styled(
                format!("{notice} (press any key)"),
                Style::default()
                    .fg(Color::Red)
                    .add_modifier(Modifier::BOLD),
            ))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(chunks[1], buf);
        }

        Paragraph::new(Span::styled(
            help_text(self),
            Style::default().add_modifier(Modifier::DIM),
        ))
        .alignment(Alignment::Center)
        .render(chunks[2], buf);
    }
}

fn title(role: Role) -> &'static str {
    match role {
        Role::Primary => " Pump Rate Calculator ",
        Role::Secondary => " Pump Rate ",
    }
}

fn row(label: &str, value: String) -> Line<'static> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    Line::from(vec![
        Span::styled(format!("{label:<16}"), Style::default().fg(Color::Gray)),
        Span::styled(value, bold),
    ])
}

fn edit_row(app: &App, label: &str, field: Field, text: &str) -> Line<'static> {
    if app.editing == Some(field) {
        Line::from(vec![
            Span::styled(format!("{label:<16}"), Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{text}_"),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            ),
        ])
    } else {
        row(label, text.to_string())
    }
}

fn primary_lines(app: &App) -> Vec<Line<'static>> {
    let session = &app.session;
    let metrics = app.metrics;
    vec![
        row("Start time", format::start_time(session.start_time())),
        row(
            "Time elapsed",
            format::elapsed(metrics.map(|m| m.elapsed_seconds)),
        ),
        row("SPM", format::spm(session.spm())),
        row("Pump rate", format::volume(session.pump_rate())),
        row(
            "Volume away",
            format::volume(metrics.map(|m| m.volume_displaced)),
        ),
        Line::default(),
        edit_row(app, "Coefficient", Field::Coefficient, &app.coefficient_text),
        edit_row(app, "Efficiency", Field::Efficiency, &app.efficiency_text),
    ]
}

fn secondary_lines(app: &App) -> Vec<Line<'static>> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let volume = app
        .metrics
        .map(|m| format!("{} m3 away", format::volume(Some(m.volume_displaced))))
        .unwrap_or_else(|| format::PLACEHOLDER.to_string());
    let rate = app
        .session
        .pump_rate()
        .map(|r| format!("{} m3/min", format::volume(Some(r))))
        .unwrap_or_else(|| format::PLACEHOLDER.to_string());

    vec![
        Line::from(Span::styled(volume, bold)),
        Line::from(Span::styled(rate, bold)),
        Line::default(),
        Line::from(format::coefficient_label(app.session.parameters().coefficient)),
    ]
}

fn help_text(app: &App) -> &'static str {
    if app.editing.is_some() {
        return "(enter) save  (esc) cancel";
    }
    match (app.role(), app.is_running()) {
        (Role::Primary, false) => "(space) start  (c) coefficient  (e) efficiency  (p) more apps  (q) quit",
        (Role::Primary, true) => {
            "(space) stroke  (r) reset  (c) coefficient  (e) efficiency  (p) more apps  (q) quit"
        }
        (Role::Secondary, false) => "(space) start  (q) quit",
        (Role::Secondary, true) => "(space) stroke  (r) reset  (q) quit",
    }
}
