//! Token grammar of the EMS text protocol.
//!
//! A command line is either an *action* (contains the action marker
//! anywhere) or an *option* (starts with the option sentinel). Actions carry
//! up to three `<marker><digits>` parameters which may appear in any order:
//!
//! ```text
//! ACT CHANNEL0 TIME1200 INTENSITY5     verbose grammar
//! G C0 I5 T1200                        compact grammar (host tools)
//! ```
//!
//! Options use fixed character offsets for their category and selector and
//! a bracketed `[channel,value]` payload:
//!
//! ```text
//! #xMA[2,80]    max intensity of channel 2 = 80
//! #xMI[2,10]    min intensity of channel 2 = 10
//! #xCT[1,300]   change time of channel 1 = 300 (parsed only)
//! ```

/// Outcome of looking up one parameter marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The marker does not occur in the input.
    Missing,
    /// The marker occurs but is not immediately followed by a digit.
    NoDigits,
    Value(u32),
}

impl Lookup {
    pub fn value(self) -> Option<u32> {
        match self {
            Lookup::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Top-level shape of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandShape {
    Empty,
    Action,
    Option,
    Unrecognized,
}

/// Declared token table for one dialect of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub action: &'static str,
    pub channel: &'static str,
    pub time: &'static str,
    pub intensity: &'static str,
    pub option_sentinel: char,
    /// Character offset of the option category.
    pub category_offset: usize,
    /// Character offset of the option selector.
    pub selector_offset: usize,
    pub change_time_category: char,
    pub change_time_selector: char,
    pub intensity_bound_category: char,
    pub max_intensity_selector: char,
    pub min_intensity_selector: char,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::verbose()
    }
}

impl Grammar {
    /// Spelled-out markers: `ACT CHANNEL1 TIME500 INTENSITY3`.
    pub fn verbose() -> Self {
        Self {
            action: "ACT",
            channel: "CHANNEL",
            time: "TIME",
            intensity: "INTENSITY",
            option_sentinel: '#',
            ..Self::option_layout()
        }
    }

    /// Single-letter markers as sent by the BLE host tools: `G C1 I3 T500`.
    pub fn compact() -> Self {
        Self {
            action: "G",
            channel: "C",
            time: "T",
            intensity: "I",
            option_sentinel: 'O',
            ..Self::option_layout()
        }
    }

    fn option_layout() -> Self {
        Self {
            action: "",
            channel: "",
            time: "",
            intensity: "",
            option_sentinel: '\0',
            category_offset: 2,
            selector_offset: 3,
            change_time_category: 'C',
            change_time_selector: 'T',
            intensity_bound_category: 'M',
            max_intensity_selector: 'A',
            min_intensity_selector: 'I',
        }
    }

    /// Decides how a line is routed. The action marker wins over the option
    /// sentinel, so `#...ACT...` is an action.
    pub fn classify(&self, input: &str) -> CommandShape {
        if input.is_empty() {
            CommandShape::Empty
        } else if input.contains(self.action) {
            CommandShape::Action
        } else if input.starts_with(self.option_sentinel) {
            CommandShape::Option
        } else {
            CommandShape::Unrecognized
        }
    }

    /// Finds the first occurrence of `marker` and reads the number behind it.
    pub fn lookup(&self, input: &str, marker: &str) -> Lookup {
        match input.find(marker) {
            None => Lookup::Missing,
            Some(start) => match extract_number_after(input, start, marker.len()) {
                Some(v) => Lookup::Value(v),
                None => Lookup::NoDigits,
            },
        }
    }

    pub fn category(&self, input: &str) -> Option<char> {
        input.chars().nth(self.category_offset)
    }

    pub fn selector(&self, input: &str) -> Option<char> {
        input.chars().nth(self.selector_offset)
    }
}

/// Reads the unsigned decimal number that starts right after a marker.
///
/// `marker_start` is the byte offset of the marker and `marker_len` its length
/// in bytes. Scanning stops at the first non-digit. Returns `None` when not a
/// single digit follows the marker. Values saturate at `u32::MAX`.
pub fn extract_number_after(input: &str, marker_start: usize, marker_len: usize) -> Option<u32> {
    let tail = input.as_bytes().get(marker_start + marker_len..)?;
    tail.iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(None, |acc: Option<u32>, b| {
            let digit = u32::from(b - b'0');
            Some(acc.unwrap_or(0).saturating_mul(10).saturating_add(digit))
        })
}

/// Splits a `[channel,value]` payload out of an option line.
///
/// Uses the first `[`, the last `]` and the first `,` after the `[`.
pub fn bracket_payload(input: &str) -> Option<(&str, &str)> {
    let left = input.find('[')?;
    let right = input.rfind(']')?;
    let separator = left + 1 + input[left + 1..].find(',')?;
    if left < separator && separator < right {
        Some((&input[left + 1..separator], &input[separator + 1..right]))
    } else {
        None
    }
}
