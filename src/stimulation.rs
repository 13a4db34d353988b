//! Host-side helpers: building action lines and playing them on a schedule.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::TimelineError;
use crate::grammar::Grammar;

pub const MIN_INTENSITY: u32 = 1;
pub const MAX_INTENSITY: u32 = 255;
/// Shortest duration reachable by [`Stimulation::nudge_duration`].
pub const MIN_DURATION_MS: u32 = 200;

/// One pulse request as a host sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stimulation {
    pub channel: u32,
    pub intensity: u32,
    pub duration_ms: u32,
}

impl Default for Stimulation {
    fn default() -> Self {
        Self {
            channel: 0,
            intensity: MIN_INTENSITY,
            duration_ms: 2000,
        }
    }
}

impl Stimulation {
    pub fn new(channel: u32, intensity: u32, duration_ms: u32) -> Self {
        Self {
            channel,
            intensity: intensity.clamp(MIN_INTENSITY, MAX_INTENSITY),
            duration_ms,
        }
    }

    pub fn nudge_intensity(&mut self, delta: i32) {
        let next = i64::from(self.intensity) + i64::from(delta);
        let next = next.clamp(i64::from(MIN_INTENSITY), i64::from(MAX_INTENSITY));
        self.intensity = u32::try_from(next).unwrap_or(MIN_INTENSITY);
    }

    pub fn nudge_duration(&mut self, delta: i32) {
        let next = i64::from(self.duration_ms) + i64::from(delta);
        let next = next.clamp(i64::from(MIN_DURATION_MS), i64::from(u32::MAX));
        self.duration_ms = u32::try_from(next).unwrap_or(MIN_DURATION_MS);
    }

    /// Moves to the next channel, wrapping after `channel_count`.
    pub fn cycle_channel(&mut self, channel_count: u32) {
        if channel_count > 0 {
            self.channel = (self.channel + 1) % channel_count;
        }
    }

    /// Renders the request as an action line in `grammar`.
    pub fn encode(&self, grammar: &Grammar) -> String {
        format!(
            "{} {}{} {}{} {}{}",
            grammar.action,
            grammar.channel,
            self.channel,
            grammar.intensity,
            self.intensity,
            grammar.time,
            self.duration_ms
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Offset from the start of the unit.
    pub at: Duration,
    /// Index of the board the command is sent to.
    pub board: usize,
    pub command: String,
}

/// One unit of playback: commands ordered by time offset, emitted once each
/// as time passes.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    next: usize,
    length: Option<Duration>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// A unit that lasts at least `length`, even after its last command.
    pub fn with_length(length: Duration) -> Self {
        Self {
            length: Some(length),
            ..Self::default()
        }
    }

    /// Adds a command for `board`. Entries with equal offsets keep insertion
    /// order. An entry added behind the playback position is emitted on the
    /// next [`Timeline::due`].
    pub fn push(&mut self, at: Duration, board: usize, command: impl Into<String>) {
        let index = self.entries.partition_point(|e| e.at <= at).max(self.next);
        self.entries.insert(
            index,
            TimelineEntry {
                at,
                board,
                command: command.into(),
            },
        );
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The declared length, or the latest offset if that is later.
    pub fn duration(&self) -> Duration {
        let latest = self.entries.iter().map(|e| e.at).max().unwrap_or_default();
        self.length.map_or(latest, |length| length.max(latest))
    }

    /// Entries that became due at `elapsed` and were not returned before.
    pub fn due(&mut self, elapsed: Duration) -> &[TimelineEntry] {
        let start = self.next;
        let end = start + self.entries[start..].partition_point(|e| e.at <= elapsed);
        self.next = end;
        &self.entries[start..end]
    }

    /// Every entry has been emitted.
    pub fn is_finished(&self) -> bool {
        self.next >= self.entries.len()
    }

    /// Every entry has been emitted and the unit's length has run out.
    pub fn is_over(&self, elapsed: Duration) -> bool {
        self.is_finished() && elapsed >= self.duration()
    }

    /// Rewinds playback to the start.
    pub fn rewind(&mut self) {
        self.next = 0;
    }

    /// Reads `<seconds> <board> <command>` lines into one unit. Blank lines
    /// and lines starting with `#` are skipped.
    pub fn parse(script: &str) -> Result<Self, TimelineError> {
        let mut timeline = Self::new();
        for (number, line) in script_lines(script) {
            let (at, board, command) = parse_entry(line, number)?;
            timeline.push(at, board, command);
        }
        Ok(timeline)
    }
}

/// Units played back to back.
///
/// Script format, one item per line:
///
/// ```text
/// # comment
/// unit 10                 start a unit lasting at least 10 s
/// 0.1 0 G C0 I1 T2000     at 0.1 s into the unit, send to board 0
/// ```
///
/// Entries before the first `unit` line form a unit with no declared length.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    units: Vec<Timeline>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: Timeline) {
        self.units.push(unit);
    }

    pub fn units(&self) -> &[Timeline] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [Timeline] {
        &mut self.units
    }

    /// Number of commands across every unit.
    pub fn len(&self) -> usize {
        self.units.iter().map(Timeline::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.units.iter().all(Timeline::is_empty)
    }

    pub fn duration(&self) -> Duration {
        self.units.iter().map(Timeline::duration).sum()
    }

    /// Rewinds every unit.
    pub fn rewind(&mut self) {
        self.units.iter_mut().for_each(Timeline::rewind);
    }

    pub fn parse(script: &str) -> Result<Self, TimelineError> {
        let mut sequence = Self::new();
        let mut current: Option<Timeline> = None;
        for (number, line) in script_lines(script) {
            let mut parts = line.splitn(2, char::is_whitespace);
            if parts.next() == Some(UNIT_DIRECTIVE) {
                let length = parts
                    .next()
                    .map(str::trim)
                    .ok_or_else(|| syntax(number, "expected `unit <seconds>`"))?;
                let length = parse_seconds(length, number)?;
                debug!(?length, "timeline unit");
                sequence.units.extend(current.replace(Timeline::with_length(length)));
                continue;
            }

            let (at, board, command) = parse_entry(line, number)?;
            debug!(?at, board, command, "timeline entry");
            current.get_or_insert_with(Timeline::new).push(at, board, command);
        }
        sequence.units.extend(current);
        Ok(sequence)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TimelineError> {
        let path = path.as_ref();
        let script = fs::read_to_string(path).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&script)
    }
}

const UNIT_DIRECTIVE: &str = "unit";

/// Trimmed, 1-numbered script lines without blanks and comments.
fn script_lines(script: &str) -> impl Iterator<Item = (usize, &str)> {
    script
        .lines()
        .enumerate()
        .map(|(number, raw)| (number + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn syntax(line: usize, reason: &str) -> TimelineError {
    TimelineError::Syntax {
        line,
        reason: reason.to_string(),
    }
}

fn parse_seconds(text: &str, line: usize) -> Result<Duration, TimelineError> {
    let seconds: f64 = text
        .parse()
        .map_err(|_| syntax(line, "offset is not a number"))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| syntax(line, "offset must be a non-negative number of seconds"))
}

fn parse_entry(line: &str, number: usize) -> Result<(Duration, usize, &str), TimelineError> {
    const FORM: &str = "expected `<seconds> <board> <command>`";
    let (offset, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| syntax(number, FORM))?;
    let (board, command) = rest
        .trim_start()
        .split_once(char::is_whitespace)
        .ok_or_else(|| syntax(number, FORM))?;
    let at = parse_seconds(offset, number)?;
    let board = board
        .parse()
        .map_err(|_| syntax(number, "board is not an index"))?;
    Ok((at, board, command.trim()))
}
