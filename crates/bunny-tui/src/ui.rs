//! UI rendering for tbunny

use std::time::Instant;

use bunny_view::vhost_display_name;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Row, Table, TableState, Tabs},
};

use crate::app::{App, Listing, Tab};
use crate::form::{ClusterForm, Field};

/// Add-cluster popup height: one line per field, a blank, a hint and borders.
const FORM_HEIGHT: u16 = 8;

/// Main UI rendering function
pub fn draw(frame: &mut Frame, app: &App) {
    if app.splash_until.is_some_and(|until| Instant::now() < until) {
        draw_splash(frame, frame.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Cluster info
            Constraint::Min(0),    // Main content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);
    draw_cluster_info(frame, app, chunks[1]);
    draw_main(frame, app, chunks[2]);
    draw_footer(frame, app, chunks[3]);

    if let Some(form) = &app.form {
        draw_form(frame, form, frame.area());
    }
}

fn draw_splash(frame: &mut Frame, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "tbunny",
            Style::default()
                .fg(Color::Rgb(255, 102, 0))
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(format!("v{}", env!("CARGO_PKG_VERSION"))),
        Line::from(Span::styled(
            "RabbitMQ in your terminal",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<&str> = Tab::ALL.iter().map(|t| t.title()).collect();
    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" tbunny ")
                .title_style(
                    Style::default()
                        .fg(Color::Rgb(255, 102, 0))
                        .add_modifier(Modifier::BOLD),
                ),
        )
        .select(app.tab.index())
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(tabs, area);
}

fn draw_cluster_info(frame: &mut Frame, app: &App, area: Rect) {
    let line = match app.cluster_info() {
        None => Line::from(Span::styled(
            "  not connected",
            Style::default().fg(Color::DarkGray),
        )),
        Some((info, available)) => {
            let status = if available {
                Span::styled("● available", Style::default().fg(Color::Green))
            } else {
                Span::styled("○ unreachable", Style::default().fg(Color::Red))
            };
            let vhost = app
                .cluster()
                .map(|c| c.active_virtual_host())
                .unwrap_or_default();
            Line::from(vec![
                Span::raw("  "),
                status,
                Span::raw(format!(
                    "  │  {} ({})  │  {}@{}  │  RabbitMQ {}  Erlang {}  │  vhost {}",
                    info.name,
                    info.cluster_name,
                    info.username,
                    app.cluster().map(|c| c.uri()).unwrap_or_default(),
                    info.rabbitmq_version,
                    info.erlang_version,
                    vhost_display_name(&vhost),
                )),
            ])
        }
    };

    let paragraph = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn draw_main(frame: &mut Frame, app: &App, area: Rect) {
    let mut title = format!(" {} ", app.view_title());
    if app.view_paused() {
        title.push_str("[paused] ");
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title_style(Style::default().fg(Color::Cyan));

    match app.tab {
        Tab::Clusters => {
            let active = app.cluster().map(|c| c.name().to_string());
            let rows = app.clusters.rows.iter().map(|c| {
                let marker = if active.as_deref() == Some(c.name()) { "*" } else { " " };
                Row::new(vec![
                    marker.to_string(),
                    c.name().to_string(),
                    c.connection.to_string(),
                    c.connection.username.clone(),
                    vhost_display_name(&c.vhost).to_string(),
                ])
            });
            draw_table(
                frame,
                area,
                block,
                &app.clusters,
                rows,
                &["", "Name", "Endpoint", "User", "Vhost"],
                &[
                    Constraint::Length(1),
                    Constraint::Length(20),
                    Constraint::Min(30),
                    Constraint::Length(12),
                    Constraint::Length(16),
                ],
            );
        }
        Tab::Vhosts => {
            let active = app
                .cluster()
                .map(|c| c.active_virtual_host())
                .unwrap_or_default();
            let rows = app.vhosts.rows.iter().map(|v| {
                let marker = if v.name == active { "*" } else { " " };
                Row::new(vec![
                    marker.to_string(),
                    v.name.clone(),
                    v.description.clone(),
                    count(v.messages_ready),
                    count(v.messages_unacknowledged),
                    count(v.messages),
                    flag(v.tracing, "on"),
                ])
            });
            draw_table(
                frame,
                area,
                block,
                &app.vhosts,
                rows,
                &["", "Name", "Description", "Ready", "Unacked", "Total", "Tracing"],
                &[
                    Constraint::Length(1),
                    Constraint::Length(20),
                    Constraint::Min(20),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                ],
            );
        }
        Tab::Queues => {
            let rows = app.queues.rows.iter().map(|q| {
                Row::new(vec![
                    q.vhost.clone(),
                    q.name.clone(),
                    q.queue_type.clone(),
                    q.state.clone().unwrap_or_else(|| "-".to_string()),
                    q.messages_ready.to_string(),
                    q.messages_unacknowledged.to_string(),
                    q.messages.to_string(),
                    q.consumers.to_string(),
                ])
            });
            draw_table(
                frame,
                area,
                block,
                &app.queues,
                rows,
                &["Vhost", "Name", "Type", "State", "Ready", "Unacked", "Total", "Consumers"],
                &[
                    Constraint::Length(12),
                    Constraint::Min(20),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(8),
                    Constraint::Length(10),
                ],
            );
        }
        Tab::Exchanges => {
            let rows = app.exchanges.rows.iter().map(|e| {
                let name = if e.name.is_empty() {
                    "(AMQP default)".to_string()
                } else {
                    e.name.clone()
                };
                Row::new(vec![
                    e.vhost.clone(),
                    name,
                    e.exchange_type.clone(),
                    flag(e.durable, "D"),
                    flag(e.auto_delete, "AD"),
                    flag(e.internal, "I"),
                ])
            });
            draw_table(
                frame,
                area,
                block,
                &app.exchanges,
                rows,
                &["Vhost", "Name", "Type", "Durable", "Auto-delete", "Internal"],
                &[
                    Constraint::Length(12),
                    Constraint::Min(20),
                    Constraint::Length(10),
                    Constraint::Length(8),
                    Constraint::Length(12),
                    Constraint::Length(9),
                ],
            );
        }
        Tab::Connections => {
            let rows = app.connections.rows.iter().map(|c| {
                let peer = match (&c.peer_host, c.peer_port) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    (Some(host), None) => host.clone(),
                    _ => "-".to_string(),
                };
                Row::new(vec![
                    c.vhost.clone(),
                    c.name.clone(),
                    c.user.clone(),
                    c.state.clone(),
                    c.protocol.clone(),
                    peer,
                    c.channels.to_string(),
                ])
            });
            draw_table(
                frame,
                area,
                block,
                &app.connections,
                rows,
                &["Vhost", "Name", "User", "State", "Protocol", "Peer", "Channels"],
                &[
                    Constraint::Length(12),
                    Constraint::Min(24),
                    Constraint::Length(12),
                    Constraint::Length(10),
                    Constraint::Length(12),
                    Constraint::Length(22),
                    Constraint::Length(8),
                ],
            );
        }
    }
}

fn draw_table<'a, T>(
    frame: &mut Frame,
    area: Rect,
    block: Block<'a>,
    listing: &Listing<T>,
    rows: impl Iterator<Item = Row<'a>>,
    header: &[&'a str],
    widths: &[Constraint],
) {
    let header = Row::new(header.to_vec()).style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );
    let table = Table::new(rows, widths.to_vec())
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = TableState::default();
    if !listing.rows.is_empty() {
        state.select(Some(listing.selected));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn flag(value: bool, label: &str) -> String {
    if value { label.to_string() } else { String::new() }
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn draw_form(frame: &mut Frame, form: &ClusterForm, area: Rect) {
    let popup = centered(area, 60, FORM_HEIGHT);

    let mut lines: Vec<Line> = Field::ALL
        .iter()
        .map(|&field| {
            let style = if field == form.focus {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let cursor = if field == form.focus { "_" } else { "" };
            Line::from(vec![
                Span::styled(format!(" {:<10}", field.label()), style),
                Span::raw(format!("{}{cursor}", form.display_value(field))),
            ])
        })
        .collect();
    lines.push(Line::from(""));
    match &form.error {
        Some(error) => lines.push(Line::from(Span::styled(
            format!(" {error}"),
            Style::default().fg(Color::Red),
        ))),
        None => lines.push(Line::from(Span::styled(
            " [enter] save  [tab] next field  [esc] cancel",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Add cluster ")
            .title_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(Clear, popup);
    frame.render_widget(paragraph, popup);
}

/// A `width` x `height` rectangle in the middle of `area`, clipped to it.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn draw_footer(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![Span::raw("  ")];
    match &app.status {
        Some(status) if status.is_error => spans.push(Span::styled(
            status.message.clone(),
            Style::default().fg(Color::Red),
        )),
        Some(status) => spans.push(Span::styled(
            status.message.clone(),
            Style::default().fg(Color::Green),
        )),
        None => {}
    }
    spans.push(Span::raw("  │  "));

    let mut help = String::from("[Tab] Switch view  [q] Quit");
    for (key, description) in app.key_help() {
        help.push_str(&format!("  {key} {description}"));
    }
    spans.push(Span::styled(help, Style::default().fg(Color::DarkGray)));

    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, area);
}
