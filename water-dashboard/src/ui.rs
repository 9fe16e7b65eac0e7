use crate::api::TelemetryApi;
use crate::app::{App, LoginField, Mode, Screen, Severity};
use crate::period::TimeFilter;
use crate::stats::chart_points;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{
        Axis, Block, Borders, Chart, Clear, Dataset, GraphType, List, ListItem, ListState, Paragraph, Tabs,
        Wrap,
    },
    Frame,
};

pub fn draw<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    match app.screen {
        Screen::Login => draw_login(f, app),
        Screen::Dashboard => draw_dashboard(f, app),
    }

    if app.notification.is_some() {
        draw_notification(f, app);
    }
}

fn draw_login<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    let area = centered_rect(50, 60, f.size());
    f.render_widget(Clear, area);

    let outer = Block::default()
        .borders(Borders::ALL)
        .title("Device Login")
        .title_alignment(Alignment::Center);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(1),
        ])
        .split(inner);

    let description = Paragraph::new("Enter your device credentials to log in")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    f.render_widget(description, chunks[0]);

    let field_style = |field: LoginField| {
        if app.login.focus == field {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        }
    };

    let device_id = Paragraph::new(app.login.device_id.as_str())
        .style(field_style(LoginField::DeviceId))
        .block(Block::default().borders(Borders::ALL).title("Device ID"));
    f.render_widget(device_id, chunks[1]);

    let pin = Paragraph::new(app.get_masked_pin())
        .style(field_style(LoginField::Pin))
        .block(Block::default().borders(Borders::ALL).title("Device PIN"));
    f.render_widget(pin, chunks[2]);

    let status = if app.login.loading {
        Line::from(Span::styled("Logging in...", Style::default().fg(Color::Cyan)))
    } else if let Some(ref message) = app.login.message {
        Line::from(Span::styled(message.clone(), Style::default().fg(Color::Red)))
    } else {
        Line::from("")
    };
    f.render_widget(Paragraph::new(status).alignment(Alignment::Center), chunks[3]);

    let help = Paragraph::new("Tab: Switch field | Enter: Log in | Esc: Quit")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(help, chunks[4]);

    if !app.login.loading {
        let (field_area, len) = match app.login.focus {
            LoginField::DeviceId => (chunks[1], app.login.device_id.chars().count()),
            LoginField::Pin => (chunks[2], app.login.pin.chars().count()),
        };
        f.set_cursor(field_area.x + len as u16 + 1, field_area.y + 1);
    }
}

fn draw_dashboard<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(12),
            Constraint::Length(4),
            Constraint::Length(3),
        ])
        .split(f.size());

    draw_header(f, chunks[0], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(68), Constraint::Percentage(32)])
        .split(chunks[1]);
    draw_chart(f, body[0], app);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(4)])
        .split(body[1]);
    draw_date_panel(f, side[0], app);
    draw_statuses(f, side[1], app);

    draw_summary(f, chunks[2], app);
    draw_footer(f, chunks[3], app);

    match app.mode {
        Mode::GotoDate => draw_input_popup(f, app),
        Mode::StatusDetails => draw_detail_popup(f, app),
        Mode::Normal => {}
    }
}

fn draw_header<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let device = app
        .session
        .as_ref()
        .map(|s| s.device_id.as_str())
        .unwrap_or("-");

    let status_text = if app.loading {
        " [Loading...] "
    } else if app.auto_refresh {
        " [Auto-refresh ON] "
    } else {
        " [Auto-refresh OFF] "
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Water Usage", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::styled(format!("Device {}", device), Style::default().fg(Color::Magenta)),
        Span::styled(status_text, Style::default().fg(Color::Yellow)),
    ]))
    .block(Block::default().borders(Borders::ALL))
    .alignment(Alignment::Left);
    f.render_widget(header, chunks[0]);

    let titles: Vec<&str> = TimeFilter::ALL.iter().map(|t| t.label()).collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("Time Range"))
        .select(app.time_filter.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD));
    f.render_widget(tabs, chunks[1]);
}

fn draw_chart<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let block = Block::default().borders(Borders::ALL).title("Consumption");

    if app.series.data.is_empty() || app.series.labels.is_empty() {
        let empty_msg = if app.loading {
            "Loading readings..."
        } else {
            "No readings for this period. Press 'r' to refresh."
        };

        let paragraph = Paragraph::new(empty_msg)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
        return;
    }

    let points = chart_points(&app.series);
    let (low, high) = value_bounds(&points);
    let x_max = points.len().saturating_sub(1).max(1) as f64;

    let datasets = vec![
        Dataset::default()
            .name("Usage")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Blue))
            .data(&points),
    ];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(axis_labels(&app.series.labels, points.len())),
        )
        .y_axis(
            Axis::default()
                .title("L")
                .style(Style::default().fg(Color::Gray))
                .bounds([low, high])
                .labels(vec![
                    Span::raw(format!("{:.1}", low)),
                    Span::raw(format!("{:.1}", (low + high) / 2.0)),
                    Span::raw(format!("{:.1}", high)),
                ]),
        );

    f.render_widget(chart, area);
}

fn value_bounds(points: &[(f64, f64)]) -> (f64, f64) {
    let low = points.iter().map(|p| p.1).fold(0.0, f64::min);
    let high = points.iter().map(|p| p.1).fold(0.0, f64::max);
    if high - low <= f64::EPSILON {
        (low, low + 1.0)
    } else {
        (low, high + (high - low) * 0.1)
    }
}

/// First, middle and last label of the plotted range.
fn axis_labels(labels: &[String], plotted: usize) -> Vec<Span<'static>> {
    let last = plotted.saturating_sub(1);
    let mut picks = vec![0, last / 2, last];
    picks.dedup();
    picks
        .into_iter()
        .filter_map(|i| labels.get(i))
        .map(|l| Span::raw(l.clone()))
        .collect()
}

fn draw_date_panel<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let content = Text::from(vec![
        Line::from(Span::styled(
            app.date_label(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("←/→: previous/next {}", app.time_filter.label().to_lowercase()),
            Style::default().fg(Color::Gray),
        )),
    ]);

    let panel = Paragraph::new(content)
        .block(Block::default().borders(Borders::ALL).title("Selected Date"))
        .wrap(Wrap { trim: true });
    f.render_widget(panel, area);
}

fn status_color(status: &str) -> Color {
    let status = status.to_ascii_lowercase();
    if status.contains("leak") || status.contains("error") || status.contains("alert") {
        Color::Red
    } else if status.contains("warn") || status.contains("offline") {
        Color::Yellow
    } else {
        Color::Green
    }
}

fn draw_statuses<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let block = Block::default().borders(Borders::ALL).title("Device Status");

    if app.statuses.is_empty() {
        let msg = if app.config().fetch_status {
            "No status events."
        } else {
            "Status history disabled."
        };
        f.render_widget(Paragraph::new(msg).block(block).alignment(Alignment::Center), area);
        return;
    }

    let items: Vec<ListItem> = app
        .statuses
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let content = Line::from(vec![
                Span::styled(format!("{:<20}", entry.date_time), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::styled(
                    entry.status.clone(),
                    Style::default().fg(status_color(&entry.status)).add_modifier(Modifier::BOLD),
                ),
            ]);

            let style = if i == app.selected_status {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            ListItem::new(content).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray));

    let mut list_state = ListState::default();
    list_state.select(Some(app.selected_status));
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_summary<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);

    let cards = [
        ("Total Consumption", app.summary.total),
        ("Average Usage", app.summary.average),
        ("Peak Usage", app.summary.peak),
    ];

    for (chunk, (title, value)) in chunks.iter().zip(cards) {
        let card = Paragraph::new(Span::styled(
            format!("{:.2} L", value),
            Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        ))
        .block(Block::default().borders(Borders::ALL).title(title))
        .alignment(Alignment::Center);
        f.render_widget(card, *chunk);
    }
}

fn draw_footer<A: TelemetryApi>(f: &mut Frame, area: Rect, app: &App<A>) {
    let help_text = match app.mode {
        Mode::Normal => {
            "Tab/d/m/y: Range | ←/→: Period | t: Today | g: Go to date | ↑/↓: Status | Enter: Details | r: Refresh | a: Auto-refresh | x: Logout | q: Quit"
        }
        Mode::GotoDate => "Type YYYY-MM-DD, YYYY-MM or YYYY | Enter: Go | Esc: Cancel",
        Mode::StatusDetails => "Enter/Esc: Close details",
    };

    let footer = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(footer, area);
}

fn draw_input_popup<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    let area = centered_rect(50, 20, f.size());
    f.render_widget(Clear, area);

    let input = Paragraph::new(app.input_buffer.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title("Go to Date"));
    f.render_widget(input, area);

    f.set_cursor(area.x + app.input_buffer.chars().count() as u16 + 1, area.y + 1);
}

fn draw_detail_popup<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    if let Some(entry) = app.get_selected_status() {
        let area = centered_rect(60, 40, f.size());
        f.render_widget(Clear, area);

        let content = Text::from(vec![
            Line::from(vec![
                Span::styled("Date: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(entry.date_time.clone()),
            ]),
            Line::from(vec![
                Span::styled("Status: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(entry.status.clone(), Style::default().fg(status_color(&entry.status))),
            ]),
            Line::from(vec![
                Span::styled("Timestamp: ", Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(entry.timestamp.to_string()),
            ]),
        ]);

        let detail = Paragraph::new(content)
            .block(Block::default().borders(Borders::ALL).title("Status Details"))
            .wrap(Wrap { trim: true });
        f.render_widget(detail, area);
    }
}

fn draw_notification<A: TelemetryApi>(f: &mut Frame, app: &App<A>) {
    let Some(ref notification) = app.notification else {
        return;
    };

    let screen = f.size();
    let width = (notification.message.chars().count() as u16 + 4).min(screen.width);
    let area = Rect::new(screen.width.saturating_sub(width), 0, width, 3.min(screen.height));

    let color = match notification.severity {
        Severity::Info => Color::Cyan,
        Severity::Success => Color::Green,
        Severity::Error => Color::Red,
    };

    f.render_widget(Clear, area);
    let toast = Paragraph::new(notification.message.as_str())
        .style(Style::default().fg(color))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(color)));
    f.render_widget(toast, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_include_zero_and_headroom() {
        assert_eq!(value_bounds(&[(0.0, 2.0), (1.0, 10.0)]), (0.0, 11.0));
        assert_eq!(value_bounds(&[(0.0, 0.0)]), (0.0, 1.0));
        assert_eq!(value_bounds(&[(0.0, -3.0), (1.0, 0.0)]).0, -3.0);
    }

    #[test]
    fn axis_labels_pick_ends_and_middle() {
        let labels: Vec<String> = ["00", "06", "12", "18", "24"].iter().map(|s| s.to_string()).collect();
        let picked: Vec<String> = axis_labels(&labels, 5).into_iter().map(|s| s.content.into_owned()).collect();
        assert_eq!(picked, vec!["00", "12", "24"]);

        let single = axis_labels(&labels[..1], 1);
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn status_colors_flag_problems() {
        assert_eq!(status_color("LEAK DETECTED"), Color::Red);
        assert_eq!(status_color("Offline"), Color::Yellow);
        assert_eq!(status_color("OK"), Color::Green);
    }
}
