//! MarketView TUI Dashboard Module
//! ================================
//!
//! Terminal viewer for a live market simulation.
//! Uses Ratatui for rendering and Crossbeam for snapshot delivery.
//!
//! Enable with the `dashboard` feature flag.
//!
//! Features:
//! - Agent field drawn on a braille canvas (smoothed positions, trust colours, flashes)
//! - Aggregate metrics panel (average trust, Gini, trade success rate)
//! - Average trust sparkline (last 100 snapshots)
//! - Agent table (top 12 by trust)
//! - Group visibility toggles (`0`-`9`, `a` shows all)

use std::collections::VecDeque;
use std::io::{self, Stdout};
use std::time::Instant;

use crossbeam::channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle},
        Block, Borders, Paragraph, Row, Sparkline, Table,
    },
    Frame, Terminal,
};
use tracing::warn;

use crate::ingest::{Ingest, IngestOutcome};
use crate::palette::Rgba;
use crate::surface::{DisplayList, Surface};
use crate::viewer::{Viewer, ViewerConfig};

const HISTORY: usize = 100;
const TABLE_ROWS: usize = 12;

fn tui_color(color: Rgba) -> Color {
    let [r, g, b, _] = color.to_rgba8();
    Color::Rgb(r, g, b)
}

fn trust_style(trust: f64) -> Color {
    if trust > 0.7 {
        Color::Green
    } else if trust > 0.3 {
        Color::Yellow
    } else {
        Color::Red
    }
}

// =============================================================================
// VIEWER DASHBOARD
// =============================================================================

/// Terminal front-end driving a [`Viewer`] at display rate.
pub struct ViewerDashboard {
    rx: Receiver<String>,
    ingest: Ingest,
    viewer: Viewer,
    surface: DisplayList,
    trust_history: VecDeque<u64>,
    rejected: u64,
    started: Instant,
}

impl ViewerDashboard {
    /// Create a dashboard fed with raw server messages through `rx`.
    pub fn new(rx: Receiver<String>, ingest: Ingest, config: ViewerConfig) -> Self {
        let viewer = Viewer::new(config, ingest.buffer().clone());
        let mut surface = DisplayList::new();
        surface.resize(viewer.viewport());
        Self {
            rx,
            ingest,
            viewer,
            surface,
            trust_history: VecDeque::with_capacity(HISTORY),
            rejected: 0,
            started: Instant::now(),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Ingests everything waiting on the channel (non-blocking).
    pub fn drain(&mut self) -> usize {
        let mut received = 0;
        while let Ok(text) = self.rx.try_recv() {
            received += 1;
            match self.ingest.ingest_text(&text) {
                Ok(IngestOutcome::Pushed { .. }) => {
                    if let Some(metrics) = self.viewer.latest_metrics() {
                        self.trust_history
                            .push_back((metrics.avg_trust.clamp(0.0, 1.0) * 100.0) as u64);
                        if self.trust_history.len() > HISTORY {
                            self.trust_history.pop_front();
                        }
                    }
                }
                Ok(IngestOutcome::Ignored { .. }) => {}
                Err(_) => self.rejected += 1,
            }
        }
        received
    }

    /// Handles one key press. Returns true when the dashboard should quit.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('a') => self.ingest.filter().show_all(),
            KeyCode::Char(c) if c.is_ascii_digit() => {
                let group = i64::from(c as u8 - b'0');
                let known = self.viewer.groups().into_keys();
                self.ingest.filter().toggle(group, known);
            }
            _ => {}
        }
        false
    }

    /// Follows a terminal resize. Braille cells are 2x4 dots.
    pub fn resize(&mut self, columns: u16, rows: u16) {
        if self.viewer.resize(f64::from(columns) * 2.0, f64::from(rows) * 4.0) {
            self.surface.resize(self.viewer.viewport());
        }
    }

    /// Run the TUI main loop (blocks until 'q' pressed)
    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
        let size = terminal.size()?;
        self.resize(size.width, size.height);
        let interval = self.viewer.config().frame_interval();

        loop {
            self.drain();

            let now = self.started.elapsed();
            if let Err(e) = self.viewer.render_frame(now, &mut self.surface) {
                warn!("Dashboard frame failed: {}", e);
            }
            terminal.draw(|f| self.ui(f))?;

            if event::poll(interval)? {
                match event::read()? {
                    Event::Key(key) => {
                        if self.handle_key(key.code) {
                            break;
                        }
                    }
                    Event::Resize(columns, rows) => self.resize(columns, rows),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Render the UI
    fn ui(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(10),   // Field + side panel
                Constraint::Length(6), // Sparkline
                Constraint::Length(1), // Footer
            ])
            .split(f.area());

        // === HEADER ===
        let tick = self
            .viewer
            .current_snapshot()
            .map(|s| s.tick.to_string())
            .unwrap_or_else(|| "-".to_string());
        let groups = match self.ingest.filter().visible() {
            None => "all".to_string(),
            Some(set) => set.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(","),
        };
        let header = Paragraph::new(Line::from(vec![
            Span::styled("MarketView", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  |  "),
            Span::styled(format!("tick {}", tick), Style::default().fg(Color::Cyan)),
            Span::raw("  |  "),
            Span::raw(format!("groups: {}", groups)),
            Span::raw("  |  "),
            Span::raw(format!("rejected: {}", self.rejected)),
        ]))
        .block(Block::default().borders(Borders::BOTTOM));
        f.render_widget(header, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[1]);

        // === AGENT FIELD ===
        let viewport = self.viewer.viewport();
        let (width, height) = (viewport.width(), viewport.height());
        let canvas = Canvas::default()
            .block(Block::default().title("Agents").borders(Borders::ALL))
            .marker(Marker::Braille)
            .x_bounds([0.0, width])
            .y_bounds([0.0, height])
            .paint(|ctx| {
                for (center, radius, color) in self.surface.discs() {
                    ctx.draw(&Circle {
                        x: center.x,
                        y: height - center.y,
                        radius,
                        color: tui_color(color),
                    });
                }
                for (center, radius, color) in self.surface.rings() {
                    ctx.draw(&Circle {
                        x: center.x,
                        y: height - center.y,
                        radius,
                        color: tui_color(color),
                    });
                }
            });
        f.render_widget(canvas, body[0]);

        let side = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(7), Constraint::Min(3)])
            .split(body[1]);

        // === METRICS ===
        let metrics_text = match self.viewer.latest_metrics() {
            Some(m) => vec![
                Line::from(format!("avg trust     {:.3}", m.avg_trust)),
                Line::from(format!("gini          {:.3}", m.gini_coefficient)),
                Line::from(format!("trade success {:.1}%", m.trade_success_rate * 100.0)),
                Line::from(format!(
                    "trades        {}",
                    m.trade_count.map_or("-".to_string(), |c| c.to_string())
                )),
                Line::from(format!("agents shown  {}", self.viewer.visual_entities().len())),
            ],
            None => vec![Line::from("waiting for data...")],
        };
        let metrics = Paragraph::new(metrics_text)
            .block(Block::default().title("Metrics").borders(Borders::ALL));
        f.render_widget(metrics, side[0]);

        // === AGENT TABLE ===
        let header_cells = ["ID", "Group", "Trust", "Trades"]
            .iter()
            .map(|h| Span::styled(*h, Style::default().add_modifier(Modifier::BOLD)));
        let header = Row::new(header_cells).height(1);

        let mut ranked: Vec<_> = self.viewer.visual_entities().iter().collect();
        ranked.sort_by(|a, b| b.trust().total_cmp(&a.trust()));
        let rows: Vec<Row> = ranked
            .into_iter()
            .take(TABLE_ROWS)
            .map(|v| {
                Row::new(vec![
                    Span::raw(v.id.to_string()),
                    Span::raw(v.group_id().to_string()),
                    Span::styled(format!("{:.2}", v.trust()), Style::default().fg(trust_style(v.trust()))),
                    Span::raw(v.trade_count().to_string()),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(6),
                Constraint::Length(6),
                Constraint::Length(7),
                Constraint::Length(7),
            ],
        )
        .header(header)
        .block(Block::default().title("Top agents by trust").borders(Borders::ALL));
        f.render_widget(table, side[1]);

        // === TRUST SPARKLINE ===
        let trust_data: Vec<u64> = self.trust_history.iter().cloned().collect();
        let sparkline = Sparkline::default()
            .block(Block::default().title("Average trust (last 100 snapshots)").borders(Borders::ALL))
            .data(&trust_data)
            .max(100)
            .style(Style::default().fg(Color::Cyan));
        f.render_widget(sparkline, chunks[2]);

        // === FOOTER ===
        let footer = Paragraph::new("0-9 toggle group  |  a show all  |  q quit")
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(footer, chunks[3]);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SnapshotBuffer;
    use crate::ingest::GroupFilter;
    use crate::snapshot::{Entity, GroupSummary, MetricSet, ServerMessage, Snapshot};

    fn message(tick: u64, avg_trust: f64) -> String {
        let mut snapshot = Snapshot::new(
            tick,
            vec![
                Entity::new(1, 0.0, 0.0, 0.5, 0).with_group(0),
                Entity::new(2, 0.0, 0.0, 0.5, 0).with_group(1),
            ],
            MetricSet {
                avg_trust,
                ..Default::default()
            },
        );
        for id in [0, 1] {
            snapshot.groups.insert(id, GroupSummary { group_id: id, ..Default::default() });
        }
        ServerMessage::StateUpdate(snapshot).to_json().unwrap()
    }

    fn dashboard() -> (ViewerDashboard, crossbeam::channel::Sender<String>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        let ingest = Ingest::new(SnapshotBuffer::shared(), GroupFilter::shared());
        (ViewerDashboard::new(rx, ingest, ViewerConfig::default()), tx)
    }

    #[test]
    fn test_drain_ingests_and_tracks_trust() {
        let (mut dashboard, tx) = dashboard();
        tx.send(message(1, 0.25)).unwrap();
        tx.send("not json".to_string()).unwrap();
        tx.send(message(2, 0.75)).unwrap();

        assert_eq!(dashboard.drain(), 3);
        assert_eq!(dashboard.trust_history, VecDeque::from([25, 75]));
        assert_eq!(dashboard.rejected, 1);
        assert_eq!(dashboard.viewer().buffer().latest().unwrap().tick, 2);
    }

    #[test]
    fn test_digit_keys_toggle_groups() {
        let (mut dashboard, tx) = dashboard();
        tx.send(message(1, 0.5)).unwrap();
        dashboard.drain();

        assert!(!dashboard.handle_key(KeyCode::Char('1')));
        assert!(!dashboard.ingest.filter().is_visible(1));
        assert!(dashboard.ingest.filter().is_visible(0));

        dashboard.handle_key(KeyCode::Char('a'));
        assert!(dashboard.ingest.filter().is_visible(1));

        assert!(dashboard.handle_key(KeyCode::Char('q')));
        assert!(dashboard.handle_key(KeyCode::Esc));
    }

    #[test]
    fn test_resize_uses_braille_resolution() {
        let (mut dashboard, _tx) = dashboard();
        dashboard.resize(100, 30);
        assert_eq!(dashboard.viewer().viewport().width(), 200.0);
        assert_eq!(dashboard.surface.viewport().height(), 120.0);
    }
}
