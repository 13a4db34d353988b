//! Parsed forms of the two command kinds.

use tracing::{debug, warn};

use crate::error::{ActionError, OptionError};
use crate::grammar::{bracket_payload, Grammar, Lookup};

/// Hard ceiling for a signal length. Longer requests are clamped, not rejected.
pub const MAX_SIGNAL_LENGTH: u32 = 5000;

/// Parameters of one action line. Every field is optional; routing decides
/// what an absent channel means.
///
/// A marker followed by no digits (`TIME`, `INTENSITY` on their own) leaves
/// its field `None`, so nothing is written to the driver for it. Boards that
/// sent `-1`/`-2` to the driver in that case are not reproduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCommand {
    pub channel: Option<u32>,
    /// Signal length, already clamped to [`MAX_SIGNAL_LENGTH`].
    pub signal_length: Option<u32>,
    /// Intensity as written on the wire (1-based).
    pub intensity: Option<u32>,
}

impl ActionCommand {
    pub fn parse(input: &str, grammar: &Grammar) -> Result<Self, ActionError> {
        if input.is_empty() {
            return Err(ActionError::Empty);
        }

        let channel = match grammar.lookup(input, grammar.channel) {
            Lookup::Value(channel) => {
                debug!(channel, "channel");
                Some(channel)
            }
            Lookup::NoDigits => {
                debug!("channel marker without index");
                None
            }
            Lookup::Missing => {
                debug!("channel not found");
                None
            }
        };

        let signal_length = match grammar.lookup(input, grammar.time) {
            Lookup::Value(length) if length > MAX_SIGNAL_LENGTH => {
                warn!(
                    requested = length,
                    "signal length too long, clamped to {MAX_SIGNAL_LENGTH}"
                );
                Some(MAX_SIGNAL_LENGTH)
            }
            Lookup::Value(length) => {
                debug!(length, "signal length");
                Some(length)
            }
            Lookup::NoDigits => {
                debug!("time marker without value");
                None
            }
            Lookup::Missing => {
                debug!("signal length not found");
                None
            }
        };

        let intensity = match grammar.lookup(input, grammar.intensity) {
            Lookup::Value(intensity) => {
                debug!(intensity, "intensity");
                Some(intensity)
            }
            Lookup::NoDigits => {
                debug!("intensity marker without value");
                None
            }
            Lookup::Missing => {
                debug!("intensity not found");
                None
            }
        };

        Ok(Self {
            channel,
            signal_length,
            intensity,
        })
    }

    /// Intensity level handed to the driver: the wire value minus one.
    pub fn driver_intensity(&self) -> Option<i32> {
        self.intensity
            .map(|v| i32::try_from(v).unwrap_or(i32::MAX) - 1)
    }
}

/// What an option line configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Ramp time between intensity steps. Parsed and reported; the channel
    /// driver has no setter for it yet.
    ChangeTime,
    MaxIntensity,
    MinIntensity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionCommand {
    pub kind: OptionKind,
    pub channel: usize,
    pub value: i32,
}

impl OptionCommand {
    /// Parses an option line against a registry holding `channel_count`
    /// channels.
    pub fn parse(
        input: &str,
        grammar: &Grammar,
        channel_count: usize,
    ) -> Result<Self, OptionError> {
        if input.is_empty() {
            return Err(OptionError::Empty);
        }

        let category = grammar.category(input);
        let selector = grammar.selector(input);

        let kind = match category {
            Some(c) if c == grammar.change_time_category => {
                if selector == Some(grammar.change_time_selector) {
                    OptionKind::ChangeTime
                } else {
                    return Err(OptionError::InvalidSelector { category: c, selector });
                }
            }
            Some(c) if c == grammar.intensity_bound_category => match selector {
                Some(s) if s == grammar.max_intensity_selector => OptionKind::MaxIntensity,
                Some(s) if s == grammar.min_intensity_selector => OptionKind::MinIntensity,
                _ => return Err(OptionError::InvalidSelector { category: c, selector }),
            },
            other => return Err(OptionError::UnknownCategory(other)),
        };

        let (channel, value) = bracket_payload(input).ok_or(OptionError::MalformedPayload)?;
        let channel: i64 = parse_field(channel)?;
        let value: i32 = parse_field(value)?;

        let channel = usize::try_from(channel)
            .ok()
            .filter(|&c| c < channel_count)
            .ok_or(OptionError::ChannelOutOfRange {
                channel,
                count: channel_count,
            })?;

        Ok(Self { kind, channel, value })
    }
}

fn parse_field<T: std::str::FromStr>(field: &str) -> Result<T, OptionError> {
    field
        .trim()
        .parse()
        .map_err(|_| OptionError::InvalidNumber(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_full_action() {
        let cmd =
            ActionCommand::parse("ACT CHANNEL0 TIME1200 INTENSITY5", &Grammar::verbose()).unwrap();
        assert_eq!(cmd.channel, Some(0));
        assert_eq!(cmd.signal_length, Some(1200));
        assert_eq!(cmd.intensity, Some(5));
        assert_eq!(cmd.driver_intensity(), Some(4));
    }

    #[test]
    fn markers_may_come_in_any_order() {
        let cmd =
            ActionCommand::parse("ACT INTENSITY2 TIME10 CHANNEL1", &Grammar::verbose()).unwrap();
        assert_eq!(
            cmd,
            ActionCommand {
                channel: Some(1),
                signal_length: Some(10),
                intensity: Some(2),
            }
        );
    }

    #[test]
    fn missing_markers_stay_unresolved() {
        let cmd = ActionCommand::parse("ACT TIME100", &Grammar::verbose()).unwrap();
        assert_eq!(cmd.channel, None);
        assert_eq!(cmd.intensity, None);
        assert_eq!(cmd.signal_length, Some(100));
    }

    #[test]
    fn bare_markers_leave_fields_unset() {
        let cmd = ActionCommand::parse("ACT CHANNEL0 TIME INTENSITY", &Grammar::verbose()).unwrap();
        assert_eq!(cmd.channel, Some(0));
        assert_eq!(cmd.signal_length, None);
        assert_eq!(cmd.driver_intensity(), None);
    }

    #[test]
    fn empty_action_is_rejected() {
        assert_eq!(ActionCommand::parse("", &Grammar::verbose()), Err(ActionError::Empty));
    }

    #[test]
    fn zero_intensity_goes_below_zero() {
        let cmd = ActionCommand::parse("G C0 I0", &Grammar::compact()).unwrap();
        assert_eq!(cmd.driver_intensity(), Some(-1));
    }

    #[test]
    fn parses_max_intensity_option() {
        let opt = OptionCommand::parse("#xMA[2,80]", &Grammar::verbose(), 3).unwrap();
        assert_eq!(
            opt,
            OptionCommand {
                kind: OptionKind::MaxIntensity,
                channel: 2,
                value: 80,
            }
        );
    }

    #[test]
    fn parses_min_intensity_and_change_time() {
        let grammar = Grammar::verbose();
        let min = OptionCommand::parse("#xMI[0, 12]", &grammar, 1).unwrap();
        assert_eq!(min.kind, OptionKind::MinIntensity);
        assert_eq!(min.value, 12);

        let ramp = OptionCommand::parse("#xCT[1,300]", &grammar, 2).unwrap();
        assert_eq!(ramp.kind, OptionKind::ChangeTime);
        assert_eq!((ramp.channel, ramp.value), (1, 300));
    }

    #[test]
    fn option_without_comma_is_malformed() {
        assert_eq!(
            OptionCommand::parse("#xMA[2 80]", &Grammar::verbose(), 3),
            Err(OptionError::MalformedPayload)
        );
    }

    #[test]
    fn option_channel_must_be_registered() {
        let grammar = Grammar::verbose();
        assert_eq!(
            OptionCommand::parse("#xMA[3,80]", &grammar, 3),
            Err(OptionError::ChannelOutOfRange { channel: 3, count: 3 })
        );
        assert_eq!(
            OptionCommand::parse("#xMA[-1,80]", &grammar, 3),
            Err(OptionError::ChannelOutOfRange { channel: -1, count: 3 })
        );
    }

    #[test]
    fn option_selectors_are_checked_per_category() {
        let grammar = Grammar::verbose();
        assert_eq!(
            OptionCommand::parse("#xMX[0,1]", &grammar, 1),
            Err(OptionError::InvalidSelector {
                category: 'M',
                selector: Some('X'),
            })
        );
        assert_eq!(
            OptionCommand::parse("#xCA[0,1]", &grammar, 1),
            Err(OptionError::InvalidSelector {
                category: 'C',
                selector: Some('A'),
            })
        );
        assert_eq!(
            OptionCommand::parse("#xZA[0,1]", &grammar, 1),
            Err(OptionError::UnknownCategory(Some('Z')))
        );
        assert_eq!(
            OptionCommand::parse("#x", &grammar, 1),
            Err(OptionError::UnknownCategory(None))
        );
    }

    #[test]
    fn option_fields_must_be_numbers() {
        assert_eq!(
            OptionCommand::parse("#xMA[a,80]", &Grammar::verbose(), 3),
            Err(OptionError::InvalidNumber("a".to_string()))
        );
    }

    proptest! {
        #[test]
        fn signal_length_never_exceeds_ceiling(length in 0u32..1_000_000) {
            let line = format!("ACT CHANNEL0 TIME{length}");
            let cmd = ActionCommand::parse(&line, &Grammar::verbose()).unwrap();
            prop_assert_eq!(cmd.signal_length, Some(length.min(MAX_SIGNAL_LENGTH)));
        }

        #[test]
        fn driver_intensity_is_wire_value_minus_one(v in 0u32..100_000) {
            let line = format!("ACT CHANNEL0 INTENSITY{v}");
            let cmd = ActionCommand::parse(&line, &Grammar::verbose()).unwrap();
            prop_assert_eq!(cmd.driver_intensity(), Some(v as i32 - 1));
        }
    }
}
