mod tuner;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ems_sys::{
    ChannelRegistry, Grammar, Interpreter, Outcome, Sequence, SimulatedChannel, TimelineEntry,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::tuner::LogPane;

type Ems<'a> = Interpreter<'a, SimulatedChannel>;

/// Longest line accepted from the serial port, newline excluded.
const MAX_LINE_LEN: usize = 256;

/// Command interpreter for EMS stimulation boards, with simulated outputs.
#[derive(Parser, Debug)]
#[command(name = "ems_cli", version, about, long_about = None)]
struct Args {
    /// Number of output channels on the board
    #[arg(short, long, default_value_t = 2, global = true)]
    channels: usize,

    /// Command dialect spoken on the line
    #[arg(short, long, value_enum, default_value_t = Dialect::Compact, global = true)]
    grammar: Dialect,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Type commands on stdin (default)
    Manual,
    /// Read newline-terminated commands from a serial port
    Listen {
        /// Serial port name; prompts with the available ports when omitted
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
    },
    /// Interactive stimulation tuner
    Tune {
        /// Send commands to boards on these ports instead of the simulated
        /// channels; repeat once per board
        #[arg(short, long)]
        port: Vec<String>,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
        /// Number of simulated boards when no port is given
        #[arg(long, default_value_t = 1)]
        boards: usize,
    },
    /// Play a `<seconds> <board> <command>` script against simulated boards
    Play {
        script: PathBuf,
        /// Number of simulated boards, each with `--channels` channels
        #[arg(long, default_value_t = 1)]
        boards: usize,
    },
}

impl Mode {
    fn boards(&self) -> usize {
        match self {
            Mode::Tune { port, .. } if !port.is_empty() => port.len(),
            Mode::Tune { boards, .. } | Mode::Play { boards, .. } => *boards,
            Mode::Manual | Mode::Listen { .. } => 1,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dialect {
    /// `G C0 I1 T2000`
    Compact,
    /// `ACT CHANNEL0 INTENSITY1 TIME2000`
    Verbose,
}

impl Dialect {
    fn grammar(self) -> Grammar {
        match self {
            Dialect::Compact => Grammar::compact(),
            Dialect::Verbose => Grammar::verbose(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mode = args.mode.unwrap_or(Mode::Manual);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let pane = LogPane::default();
    if let Mode::Tune { .. } = mode {
        // Terminal output would tear the TUI; logs go to the on-screen pane.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_writer(pane.clone())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        println!("=========================");
        println!("   EMS Board Simulator   ");
        println!("=========================");
    }

    let boards = mode.boards();
    if boards == 0 {
        bail!("--boards must be at least 1");
    }
    let mut banks: Vec<Vec<SimulatedChannel>> =
        (0..boards).map(|board| bank(board, args.channels)).collect();
    let mut rack = build_rack(&mut banks, &args.grammar.grammar())?;

    match mode {
        Mode::Manual => run_manual_mode(first_board(&mut rack)?),
        Mode::Listen { port, baud } => {
            let port_name = match port {
                Some(name) => name,
                None => select_port()?,
            };
            run_serial_mode(first_board(&mut rack)?, &port_name, baud)
        }
        Mode::Tune { port, baud, .. } => {
            let ports = port
                .iter()
                .map(|name| open_port(name, baud))
                .collect::<Result<Vec<_>>>()?;
            tuner::run(&mut rack, ports, &pane)
        }
        Mode::Play { script, .. } => run_play_mode(&mut rack, &script),
    }
}

// Simulated channels of one board.
fn bank(board: usize, channels: usize) -> Vec<SimulatedChannel> {
    (0..channels)
        .map(|i| SimulatedChannel::new(format!("b{board}/ch{i}")))
        .collect()
}

// One interpreter per bank, all speaking the same dialect.
fn build_rack<'a>(
    banks: &'a mut [Vec<SimulatedChannel>],
    grammar: &Grammar,
) -> Result<Vec<Ems<'a>>> {
    let mut rack = Vec::with_capacity(banks.len());
    for bank in banks.iter_mut() {
        let mut registry: ChannelRegistry<'a, SimulatedChannel> =
            ChannelRegistry::new(bank.len()).context("invalid --channels")?;
        for channel in bank.iter_mut() {
            registry.register(channel)?;
        }
        rack.push(Interpreter::new(registry, grammar.clone()));
    }
    Ok(rack)
}

fn first_board<'r, 'a>(rack: &'r mut [Ems<'a>]) -> Result<&'r mut Ems<'a>> {
    rack.first_mut().context("no board configured")
}

// Handles the manual command input mode.
fn run_manual_mode(ems: &mut Ems<'_>) -> Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'exit' to quit.");
    prompt()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "exit" {
            break;
        }

        let stopped = ems.check();
        if stopped > 0 {
            println!("< {stopped} channel(s) finished");
        }

        if !command.is_empty() {
            process_and_display_command(ems, command);
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

// Lists the serial ports and asks which one to use.
fn select_port() -> Result<String> {
    let ports = serialport::available_ports().context("could not enumerate serial ports")?;
    if ports.is_empty() {
        bail!("no serial ports found");
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    print!("Select a port (number): ");
    io::stdout().flush()?;
    let mut port_choice = String::new();
    io::stdin().read_line(&mut port_choice)?;
    match port_choice.trim().parse::<usize>() {
        Ok(i) if i < ports.len() => Ok(ports[i].port_name.clone()),
        _ => bail!("invalid port selection"),
    }
}

fn open_port(name: &str, baud: u32) -> Result<Box<dyn serialport::SerialPort>> {
    serialport::new(name, baud)
        .timeout(Duration::from_millis(10))
        .open()
        .with_context(|| format!("failed to open port '{name}'"))
}

// Handles the serial port listening mode. Checks run between reads so they
// never overlap a command.
fn run_serial_mode(ems: &mut Ems<'_>, port_name: &str, baud: u32) -> Result<()> {
    let mut port = open_port(port_name, baud)?;
    println!("\nListening on {port_name} at {baud} baud. Press Ctrl+C to exit.");

    let mut lines = LineBuffer::default();
    let mut serial_buf: Vec<u8> = vec![0; 128];
    loop {
        match port.read(serial_buf.as_mut_slice()) {
            Ok(bytes_read) => {
                for command in lines.feed(&serial_buf[..bytes_read]) {
                    info!(command = %command, "received");
                    ems.process_command(&command);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => error!("serial port error: {e}"),
        }

        let stopped = ems.check();
        if stopped > 0 {
            info!(stopped, "channels finished");
        }
    }
}

// Plays a script's units back to back in real time, each entry on its board.
fn run_play_mode(rack: &mut [Ems<'_>], script: &Path) -> Result<()> {
    let mut sequence = Sequence::load(script)?;
    println!(
        "\nPlaying {} command(s) in {} unit(s) on {} board(s) over {:.1}s",
        sequence.len(),
        sequence.units().len(),
        rack.len(),
        sequence.duration().as_secs_f64()
    );

    for (index, unit) in sequence.units_mut().iter_mut().enumerate() {
        info!(unit = index, length = ?unit.duration(), "unit started");
        let start = Instant::now();
        loop {
            let elapsed = start.elapsed();
            for entry in unit.due(elapsed) {
                if let Some(outcome) = play_entry(rack, entry) {
                    display_outcome(&entry.command, outcome);
                }
            }
            check_all(rack);
            if unit.is_over(elapsed) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    while any_pulsing(rack) {
        check_all(rack);
        thread::sleep(Duration::from_millis(1));
    }
    rack.iter_mut().for_each(|ems| ems.shutdown());
    println!("Done.");
    Ok(())
}

// Sends a timeline entry to its board. Entries for a board that does not
// exist are skipped.
fn play_entry(rack: &mut [Ems<'_>], entry: &TimelineEntry) -> Option<Outcome> {
    let boards = rack.len();
    let Some(ems) = rack.get_mut(entry.board) else {
        warn!(
            board = entry.board,
            boards,
            command = %entry.command,
            "no such board, entry skipped"
        );
        return None;
    };
    info!(at = ?entry.at, board = entry.board, command = %entry.command, "timeline");
    Some(ems.process_command(&entry.command))
}

fn check_all(rack: &mut [Ems<'_>]) -> usize {
    rack.iter_mut().map(|ems| ems.check()).sum()
}

fn any_pulsing(rack: &[Ems<'_>]) -> bool {
    rack.iter().any(|ems| {
        (0..ems.registry().count())
            .filter_map(|i| ems.registry().get(i))
            .any(|c| c.is_pulsing())
    })
}

// Common function to process a command string and print the outcome.
fn process_and_display_command(ems: &mut Ems<'_>, command: &str) {
    let outcome = ems.process_command(command);
    display_outcome(command, outcome);
}

fn display_outcome(command: &str, outcome: Outcome) {
    match outcome {
        Outcome::Ignored => {}
        Outcome::Dispatched { channel } => println!("< channel {channel} fired"),
        Outcome::SafetyShutdown(cause) => println!("< all channels off ({cause:?})"),
        Outcome::OptionApplied(option) => println!(
            "< {:?} = {} on channel {}",
            option.kind, option.value, option.channel
        ),
        Outcome::OptionRejected(e) => warn!("option rejected: {e}"),
        Outcome::Unrecognized => eprintln!("[ERROR] Unknown command '{command}'."),
    }
}

/// Splits a byte stream into trimmed, non-empty lines.
///
/// A line longer than [`MAX_LINE_LEN`] is dropped whole: its bytes are
/// discarded up to the next newline.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if !self.discarding {
                    let line = String::from_utf8_lossy(&self.pending).trim().to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                self.pending.clear();
                self.discarding = false;
            } else if !self.discarding {
                if self.pending.len() == MAX_LINE_LEN {
                    warn!(limit = MAX_LINE_LEN, "line too long, discarding until next newline");
                    self.pending.clear();
                    self.discarding = true;
                } else {
                    self.pending.push(byte);
                }
            }
        }
        lines
    }
}
