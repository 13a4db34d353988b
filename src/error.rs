//! Error types for the EMS command layer.
//!
//! None of these ever escape [`Interpreter::process_command`](crate::Interpreter::process_command):
//! a malformed command is logged and dropped. They are returned by the
//! lower-level parsers and by registry setup so callers can inspect them.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while building the channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A registry must hold at least one channel.
    #[error("registry capacity must be at least 1")]
    ZeroCapacity,
    /// The hardware topology declares fewer channels than were registered.
    #[error("registry is full ({capacity} channels), channel not registered")]
    CapacityExceeded { capacity: usize },
}

/// Failures while parsing an action command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("action command is empty")]
    Empty,
}

/// Failures while parsing an option command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("option command is empty")]
    Empty,
    /// Category character is not one the grammar knows.
    #[error("unknown option category {0:?}")]
    UnknownCategory(Option<char>),
    /// Category is known but the selector does not belong to it.
    #[error("invalid selector {selector:?} for option category {category:?}")]
    InvalidSelector {
        category: char,
        selector: Option<char>,
    },
    /// `[channel,value]` payload is missing or out of order.
    #[error("option payload is not of the form [channel,value]")]
    MalformedPayload,
    /// Channel or value is not a decimal integer.
    #[error("option payload field {0:?} is not a number")]
    InvalidNumber(String),
    #[error("channel {channel} is out of range (0..{count})")]
    ChannelOutOfRange { channel: i64, count: usize },
}

/// Failures while reading a timeline script.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("failed to read timeline {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A script line is neither `<seconds> <board> <command>` nor
    /// `unit <seconds>`.
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}
