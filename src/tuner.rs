//! Interactive stimulation tuner.
//!
//! Keys: `q`/`w` intensity up/down, `e`/`r` duration up/down, `t` next
//! channel, `1`-`9` select a board, `s` stimulate, space switches every
//! channel off, `Esc` quits.

use std::collections::VecDeque;
use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ems_sys::Stimulation;
use parking_lot::Mutex;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table};
use ratatui::{Frame, Terminal};
use serialport::SerialPort;
use tracing::{error, info};

use crate::Ems;

const LOG_LINES: usize = 200;
const INTENSITY_STEP: i32 = 1;
const DURATION_STEP_MS: i32 = 200;

/// Ring buffer of formatted log lines shown in the tuner.
///
/// Implements [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) so the
/// fmt layer can write into it.
#[derive(Clone, Default)]
pub struct LogPane {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LogPane {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == LOG_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The newest `n` lines, oldest first.
    fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogPane {
    type Writer = PaneWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PaneWriter {
            pane: self.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Per-event writer. Buffers one formatted event and hands it to the pane on
/// drop.
pub struct PaneWriter {
    pane: LogPane,
    buf: Vec<u8>,
}

impl Write for PaneWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PaneWriter {
    fn drop(&mut self) {
        for line in String::from_utf8_lossy(&self.buf).lines() {
            self.pane.push(line.to_string());
        }
    }
}

/// Runs the tuner over `rack`. With `ports`, board `n` is the remote board on
/// `ports[n]` and requests go out over serial instead of into the rack.
pub fn run(
    rack: &mut [Ems<'_>],
    mut ports: Vec<Box<dyn SerialPort>>,
    pane: &LogPane,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, rack, &mut ports, pane);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    rack: &mut [Ems<'_>],
    ports: &mut [Box<dyn SerialPort>],
    pane: &LogPane,
) -> Result<()> {
    if rack.is_empty() {
        return Ok(());
    }
    let mut stim = Stimulation::default();
    let mut board = 0;
    let remotes: Vec<String> = ports
        .iter()
        .map(|p| p.name().unwrap_or_else(|| "serial".to_string()))
        .collect();

    loop {
        rack.iter_mut().for_each(|ems| {
            ems.check();
        });
        let remote = remotes.get(board).map(String::as_str);
        terminal.draw(|frame| draw(frame, &rack[..], board, &stim, remote, pane))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Esc => break,
            KeyCode::Char('q') => stim.nudge_intensity(INTENSITY_STEP),
            KeyCode::Char('w') => stim.nudge_intensity(-INTENSITY_STEP),
            KeyCode::Char('e') => stim.nudge_duration(DURATION_STEP_MS),
            KeyCode::Char('r') => stim.nudge_duration(-DURATION_STEP_MS),
            KeyCode::Char('t') => {
                let count = u32::try_from(rack[board].registry().count()).unwrap_or(u32::MAX);
                stim.cycle_channel(count);
            }
            KeyCode::Char(key @ '1'..='9') => {
                if let Some(index) = select_board(key, rack.len()) {
                    board = index;
                    stim.channel = 0;
                    info!(board, "board selected");
                }
            }
            KeyCode::Char('s') => {
                let line = stim.encode(rack[board].grammar());
                match ports.get_mut(board) {
                    Some(port) => match port.write_all(format!("{line}\n").as_bytes()) {
                        Ok(()) => info!(board, command = %line, "sent"),
                        Err(e) => error!(board, "failed to write to serial port: {e}"),
                    },
                    None => {
                        rack[board].process_command(&line);
                    }
                }
            }
            KeyCode::Char(' ') => rack.iter_mut().for_each(|ems| ems.shutdown()),
            _ => {}
        }
    }
    Ok(())
}

/// Board index for a number key: `1` is board 0.
fn select_board(key: char, boards: usize) -> Option<usize> {
    key.to_digit(10)
        .and_then(|digit| usize::try_from(digit).ok())
        .and_then(|digit| digit.checked_sub(1))
        .filter(|&index| index < boards)
}

/// Rows for the channel table: one per channel plus header and borders.
fn table_height(channels: usize) -> u16 {
    u16::try_from(channels).unwrap_or(u16::MAX).saturating_add(3)
}

fn draw(
    frame: &mut Frame,
    rack: &[Ems<'_>],
    board: usize,
    stim: &Stimulation,
    remote: Option<&str>,
    pane: &LogPane,
) {
    let Some(ems) = rack.get(board) else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(table_height(ems.registry().count())),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let target = match remote {
        Some(name) => format!("board on {name}"),
        None => "simulated channels".to_string(),
    };
    let request = Paragraph::new(Line::from(format!(
        "board {}/{}   channel {}   intensity {}   duration {} ms   -> {}",
        board + 1,
        rack.len(),
        stim.channel,
        stim.intensity,
        stim.duration_ms,
        target
    )))
    .block(Block::default().borders(Borders::ALL).title("Stimulation"));
    frame.render_widget(request, chunks[0]);

    let rows: Vec<Row> = (0..ems.registry().count())
        .filter_map(|i| ems.registry().get(i).map(|c| (i, c)))
        .map(|(i, c)| {
            let state = if c.is_pulsing() {
                format!("on ({} ms)", c.remaining_ms().unwrap_or(0))
            } else if c.is_active() {
                "armed".to_string()
            } else {
                "off".to_string()
            };
            let style = if c.is_pulsing() {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            Row::new(vec![
                i.to_string(),
                c.name.clone(),
                state,
                c.signal_length().to_string(),
                c.intensity().to_string(),
                format!("{}..{}", c.min_intensity(), c.max_intensity()),
                c.pulse_count().to_string(),
            ])
            .style(style)
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Length(8),
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(7),
        ],
    )
    .header(
        Row::new(vec!["#", "name", "state", "length", "intensity", "bounds", "pulses"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title("Channels"));
    frame.render_widget(table, chunks[1]);

    let visible = chunks[2].height.saturating_sub(2) as usize;
    let items: Vec<ListItem> = pane.tail(visible).into_iter().map(ListItem::new).collect();
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title("Log")),
        chunks[2],
    );

    const KEYS: &str =
        "q/w intensity  e/r duration  t channel  1-9 board  s stimulate  space all off  Esc quit";
    frame.render_widget(
        Paragraph::new(KEYS).style(Style::default().fg(Color::DarkGray)),
        chunks[3],
    );
}
