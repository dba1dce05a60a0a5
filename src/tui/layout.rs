//! TUI layout and widget rendering.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table};

use super::runtime::App;
use super::style;

/// Renders the full TUI frame.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(6),    // battery table
            Constraint::Length(12), // chart
            Constraint::Length(3), // fill gauge
            Constraint::Length(1), // footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_table(frame, app, chunks[1]);
    render_chart(frame, app, chunks[2]);
    render_fill_gauge(frame, app, chunks[3]);
    render_footer(frame, chunks[4]);
}

/// Header bar: battery count, clock, refresh interval, run state.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let (state_icon, state_label) = if app.paused {
        ("‖", "PAUSED")
    } else {
        ("▶", "LIVE")
    };
    let time_s = app.rows.first().map_or(0.0, |r| r.time_s);

    let header = Line::from(vec![
        Span::styled(
            " BOS ",
            Style::default()
                .fg(style::HEADER_FG)
                .bg(style::HEADER_BG)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " {} batteries │ t={time_s:.1}s │ {}ms │ {state_icon} {state_label} ",
            app.rows.len(),
            app.tick_interval_ms(),
        )),
    ]);
    frame.render_widget(Paragraph::new(header), area);
}

/// One row per battery with status, meter and credit.
fn render_table(frame: &mut Frame, app: &App, area: Rect) {
    let header = Row::new(vec![
        "name", "kind", "V", "I (A)", "SOC (Ah)", "cap (Ah)", "meter", "credit",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.rows.iter().enumerate().map(|(i, r)| {
        let row = Row::new(vec![
            Cell::from(r.name.clone()),
            Cell::from(r.kind.clone()),
            Cell::from(format!("{:.0}", r.voltage)),
            Cell::from(format!("{:+.3}", r.current)),
            Cell::from(format!("{:.3}", r.state_of_charge)),
            Cell::from(format!("{:.3}", r.max_capacity)),
            Cell::from(format!("{:.3}", r.meter)),
            Cell::from(Span::styled(
                format!("{:+.3}", r.credit),
                Style::default().fg(style::credit_color(r.credit)),
            )),
        ]);
        if i == app.selected {
            row.style(Style::default().bg(style::SELECTED_BG))
        } else {
            row
        }
    });

    let widths = [
        Constraint::Min(12),
        Constraint::Length(10),
        Constraint::Length(7),
        Constraint::Length(9),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(9),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().title(" Batteries ").borders(Borders::ALL));
    frame.render_widget(table, area);
}

/// State of charge vs meter for the highlighted battery.
fn render_chart(frame: &mut Frame, app: &App, area: Rect) {
    let soc_data: Vec<(f64, f64)> = app
        .history
        .iter()
        .map(|s| (s.time_s, s.state_of_charge))
        .collect();
    let meter_data: Vec<(f64, f64)> = app.history.iter().map(|s| (s.time_s, s.meter)).collect();

    let y_bounds = style::auto_bounds_y(&soc_data, &meter_data);
    let x_lo = soc_data.first().map_or(0.0, |p| p.0);
    let x_hi = soc_data.last().map_or(1.0, |p| p.0).max(x_lo + 1.0);

    let datasets = vec![
        Dataset::default()
            .name("SOC")
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(style::SOC_LINE))
            .data(&soc_data),
        Dataset::default()
            .name("Meter")
            .marker(symbols::Marker::Dot)
            .style(Style::default().fg(style::METER_LINE))
            .data(&meter_data),
    ];

    let title = app
        .selected_row()
        .map_or(" History ".to_string(), |r| format!(" {} ", r.name));

    let chart = Chart::new(datasets)
        .block(Block::default().title(title).borders(Borders::ALL))
        .x_axis(
            Axis::default()
                .title("s")
                .bounds([x_lo, x_hi])
                .labels(vec![format!("{x_lo:.0}"), format!("{x_hi:.0}")]),
        )
        .y_axis(
            Axis::default()
                .title("Ah")
                .bounds(y_bounds)
                .labels(vec![
                    format!("{:.1}", y_bounds[0]),
                    format!("{:.1}", y_bounds[1]),
                ]),
        );

    frame.render_widget(chart, area);
}

fn render_fill_gauge(frame: &mut Frame, app: &App, area: Rect) {
    let fill = app.selected_fill().clamp(0.0, 1.0);
    let gauge = Gauge::default()
        .block(Block::default().title(" Fill ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(style::soc_color(fill)))
        .ratio(fill)
        .label(format!("{:.0}%", fill * 100.0));
    frame.render_widget(gauge, area);
}

/// Footer with keybinding hints.
fn render_footer(frame: &mut Frame, area: Rect) {
    let footer = Paragraph::new(Line::from(Span::styled(
        " q:Quit  Space:Pause  +/-:Interval  ↑/↓:Select  r:Refresh",
        Style::default().fg(style::FOOTER_FG),
    )));
    frame.render_widget(footer, area);
}
