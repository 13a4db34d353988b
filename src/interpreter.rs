//! Command interpreter: routes one line of text to channel operations.
//!
//! Every line runs through a small state machine:
//!
//! ```text
//! Idle -> Parsing -> Dispatching { channel }     valid action
//!                 -> SafetyShutdown { cause }    action without a usable channel
//!                 -> Idle                        option, ignored or unknown line
//! ```
//!
//! Nothing here returns an error to the caller. A line that cannot be
//! understood is logged and dropped, and an action that cannot be routed to a
//! channel switches every channel off.
//!
//! All entry points take `&mut self`, so command processing and the periodic
//! [`Interpreter::check`] can never overlap. Callers sharing an interpreter
//! between threads wrap it in a single mutex.

use tracing::{debug, info, warn};

use crate::command::{ActionCommand, OptionCommand, OptionKind};
use crate::driver::ChannelDriver;
use crate::error::OptionError;
use crate::grammar::{CommandShape, Grammar};
use crate::registry::ChannelRegistry;

/// Why an action ended in a global shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// No channel index in the command.
    ChannelMissing,
    ChannelOutOfRange { channel: u32, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Parsing,
    Dispatching { channel: usize },
    SafetyShutdown { cause: ShutdownCause },
}

/// Routing decision for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Dispatch(usize),
    Shutdown(ShutdownCause),
}

impl From<Route> for Phase {
    fn from(route: Route) -> Self {
        match route {
            Route::Dispatch(channel) => Phase::Dispatching { channel },
            Route::Shutdown(cause) => Phase::SafetyShutdown { cause },
        }
    }
}

/// Dispatch to a registered channel, or shut everything down.
pub fn route(channel: Option<u32>, count: usize) -> Route {
    match channel {
        None => Route::Shutdown(ShutdownCause::ChannelMissing),
        Some(channel) => match usize::try_from(channel) {
            Ok(index) if index < count => Route::Dispatch(index),
            _ => Route::Shutdown(ShutdownCause::ChannelOutOfRange { channel, count }),
        },
    }
}

/// What a processed line did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Empty input.
    Ignored,
    Dispatched { channel: usize },
    SafetyShutdown(ShutdownCause),
    OptionApplied(OptionCommand),
    OptionRejected(OptionError),
    Unrecognized,
}

pub struct Interpreter<'a, D: ?Sized + ChannelDriver = dyn ChannelDriver + 'a> {
    registry: ChannelRegistry<'a, D>,
    grammar: Grammar,
    phase: Phase,
}

impl<'a, D: ?Sized + ChannelDriver> Interpreter<'a, D> {
    /// Takes over a fully populated registry. No channel can be added
    /// afterwards.
    pub fn new(registry: ChannelRegistry<'a, D>, grammar: Grammar) -> Self {
        info!(channels = registry.count(), "EMS interpreter ready");
        Self {
            registry,
            grammar,
            phase: Phase::Idle,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry<'a, D> {
        &self.registry
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Phase reached by the most recent line.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }

    /// Entry point for one line from the transport.
    pub fn process_command(&mut self, input: &str) -> Outcome {
        match self.grammar.classify(input) {
            CommandShape::Empty => Outcome::Ignored,
            CommandShape::Action => self.process_action(input),
            CommandShape::Option => self.process_option(input),
            CommandShape::Unrecognized => {
                warn!(command = input, "unknown command");
                self.enter(Phase::Idle);
                Outcome::Unrecognized
            }
        }
    }

    pub fn process_action(&mut self, input: &str) -> Outcome {
        self.enter(Phase::Parsing);
        let command = match ActionCommand::parse(input, &self.grammar) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                self.enter(Phase::Idle);
                return Outcome::Ignored;
            }
        };
        info!(command = input, "action received");

        let next = route(command.channel, self.registry.count());
        self.enter(next.into());

        match next {
            Route::Dispatch(channel) => {
                self.dispatch(channel, &command);
                Outcome::Dispatched { channel }
            }
            Route::Shutdown(cause) => {
                warn!(?cause, "invalid channel, shutting down all");
                self.shutdown();
                Outcome::SafetyShutdown(cause)
            }
        }
    }

    /// Configures then fires `channel`. Length and intensity are written
    /// before activation.
    fn dispatch(&mut self, channel: usize, command: &ActionCommand) {
        let Some(driver) = self.registry.get_mut(channel) else {
            return;
        };
        if let Some(length) = command.signal_length {
            driver.set_signal_length(length);
        }
        if let Some(level) = command.driver_intensity() {
            driver.set_intensity(level);
        }
        info!(channel, "activating channel");
        driver.activate();
        driver.apply_signal();
    }

    pub fn process_option(&mut self, input: &str) -> Outcome {
        self.enter(Phase::Parsing);
        let parsed = OptionCommand::parse(input, &self.grammar, self.registry.count());
        self.enter(Phase::Idle);

        let option = match parsed {
            Ok(option) => option,
            Err(e) => {
                warn!(option = input, "invalid option: {e}");
                return Outcome::OptionRejected(e);
            }
        };
        info!(option = input, "option received");

        let OptionCommand { kind, channel, value } = option;
        match kind {
            OptionKind::ChangeTime => {
                // The channel driver has no ramp-time setter; report only.
                info!(channel, change_time = value, "set channel change time");
            }
            OptionKind::MaxIntensity => {
                info!(channel, max_intensity = value, "set max intensity");
                if let Some(driver) = self.registry.get_mut(channel) {
                    driver.set_max_intensity(value);
                }
            }
            OptionKind::MinIntensity => {
                info!(channel, min_intensity = value, "set min intensity");
                if let Some(driver) = self.registry.get_mut(channel) {
                    driver.set_min_intensity(value);
                }
            }
        }
        Outcome::OptionApplied(option)
    }

    /// Deactivates every registered channel.
    pub fn shutdown(&mut self) {
        self.registry.for_each_mut(|_, driver| driver.deactivate());
    }

    /// Runs every channel's self-check and returns how many stopped.
    pub fn check(&mut self) -> usize {
        let mut stopped = 0;
        self.registry.for_each_mut(|index, driver| {
            if driver.check() {
                debug!(channel = index, "channel stopped");
                stopped += 1;
            }
        });
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ManualClock, SimulatedChannel};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Length(u32),
        Intensity(i32),
        Max(i32),
        Min(i32),
        Activate,
        Deactivate,
        Apply,
    }

    type Journal = Rc<RefCell<Vec<(usize, Call)>>>;

    struct Recorder {
        id: usize,
        journal: Journal,
        stops: bool,
    }

    impl Recorder {
        fn log(&self, call: Call) {
            self.journal.borrow_mut().push((self.id, call));
        }
    }

    impl ChannelDriver for Recorder {
        fn set_signal_length(&mut self, length_ms: u32) {
            self.log(Call::Length(length_ms));
        }
        fn set_intensity(&mut self, level: i32) {
            self.log(Call::Intensity(level));
        }
        fn set_max_intensity(&mut self, level: i32) {
            self.log(Call::Max(level));
        }
        fn set_min_intensity(&mut self, level: i32) {
            self.log(Call::Min(level));
        }
        fn activate(&mut self) {
            self.log(Call::Activate);
        }
        fn deactivate(&mut self) {
            self.log(Call::Deactivate);
        }
        fn apply_signal(&mut self) {
            self.log(Call::Apply);
        }
        fn check(&mut self) -> bool {
            self.stops
        }
    }

    fn recorders(count: usize, journal: &Journal) -> Vec<Recorder> {
        (0..count)
            .map(|id| Recorder {
                id,
                journal: Rc::clone(journal),
                stops: false,
            })
            .collect()
    }

    fn interpreter<'a>(drivers: &'a mut [Recorder]) -> Interpreter<'a, Recorder> {
        let mut registry = ChannelRegistry::new(drivers.len()).unwrap();
        for driver in drivers.iter_mut() {
            registry.register(driver).unwrap();
        }
        Interpreter::new(registry, Grammar::verbose())
    }

    #[test]
    fn route_picks_channel_or_shutdown() {
        assert_eq!(route(Some(1), 3), Route::Dispatch(1));
        assert_eq!(route(None, 3), Route::Shutdown(ShutdownCause::ChannelMissing));
        assert_eq!(
            route(Some(3), 3),
            Route::Shutdown(ShutdownCause::ChannelOutOfRange { channel: 3, count: 3 })
        );
        assert_eq!(
            Phase::from(route(Some(0), 1)),
            Phase::Dispatching { channel: 0 }
        );
    }

    #[test]
    fn action_configures_before_activation() {
        let journal = Journal::default();
        let mut drivers = recorders(3, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("ACT CHANNEL1 TIME6000 INTENSITY1");

        assert_eq!(outcome, Outcome::Dispatched { channel: 1 });
        assert_eq!(ems.phase(), Phase::Dispatching { channel: 1 });
        assert_eq!(
            *journal.borrow(),
            vec![
                (1, Call::Length(5000)),
                (1, Call::Intensity(0)),
                (1, Call::Activate),
                (1, Call::Apply),
            ]
        );
    }

    #[test]
    fn action_without_parameters_only_fires() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        ems.process_command("ACT CHANNEL0");

        assert_eq!(*journal.borrow(), vec![(0, Call::Activate), (0, Call::Apply)]);
    }

    #[test]
    fn action_without_channel_shuts_everything_down() {
        let journal = Journal::default();
        let mut drivers = recorders(3, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("ACT TIME100");

        assert_eq!(outcome, Outcome::SafetyShutdown(ShutdownCause::ChannelMissing));
        assert_eq!(
            *journal.borrow(),
            vec![
                (0, Call::Deactivate),
                (1, Call::Deactivate),
                (2, Call::Deactivate),
            ]
        );
    }

    #[test]
    fn action_with_unregistered_channel_shuts_everything_down() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("ACT CHANNEL7 TIME100 INTENSITY3");

        assert_eq!(
            outcome,
            Outcome::SafetyShutdown(ShutdownCause::ChannelOutOfRange { channel: 7, count: 2 })
        );
        assert!(journal
            .borrow()
            .iter()
            .all(|(_, call)| *call == Call::Deactivate));
        assert_eq!(journal.borrow().len(), 2);
    }

    #[test]
    fn channel_marker_without_digits_shuts_down() {
        let journal = Journal::default();
        let mut drivers = recorders(1, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("ACT CHANNEL TIME100");

        assert_eq!(outcome, Outcome::SafetyShutdown(ShutdownCause::ChannelMissing));
        assert_eq!(*journal.borrow(), vec![(0, Call::Deactivate)]);
    }

    #[test]
    fn max_intensity_option_reaches_driver() {
        let journal = Journal::default();
        let mut drivers = recorders(3, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("#xMA[2,80]");

        assert!(matches!(outcome, Outcome::OptionApplied(_)));
        assert_eq!(*journal.borrow(), vec![(2, Call::Max(80))]);
        assert_eq!(ems.phase(), Phase::Idle);
    }

    #[test]
    fn min_intensity_option_reaches_driver() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        ems.process_command("#xMI[0,5]");

        assert_eq!(*journal.borrow(), vec![(0, Call::Min(5))]);
    }

    #[test]
    fn malformed_option_touches_nothing() {
        let journal = Journal::default();
        let mut drivers = recorders(3, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("#xMA[2 80]");

        assert_eq!(outcome, Outcome::OptionRejected(OptionError::MalformedPayload));
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn option_for_unregistered_channel_touches_nothing() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("#xMA[2,80]");

        assert!(matches!(
            outcome,
            Outcome::OptionRejected(OptionError::ChannelOutOfRange { .. })
        ));
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn change_time_is_parsed_but_not_applied() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("#xCT[1,300]");

        assert_eq!(
            outcome,
            Outcome::OptionApplied(OptionCommand {
                kind: OptionKind::ChangeTime,
                channel: 1,
                value: 300,
            })
        );
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn action_marker_beats_option_sentinel() {
        let journal = Journal::default();
        let mut drivers = recorders(1, &journal);
        let mut ems = interpreter(&mut drivers);

        let outcome = ems.process_command("#xMA[0,1] ACT CHANNEL0");

        assert_eq!(outcome, Outcome::Dispatched { channel: 0 });
    }

    #[test]
    fn empty_and_unknown_lines_are_ignored() {
        let journal = Journal::default();
        let mut drivers = recorders(2, &journal);
        let mut ems = interpreter(&mut drivers);

        assert_eq!(ems.process_command(""), Outcome::Ignored);
        assert_eq!(ems.process_command("hello"), Outcome::Unrecognized);
        assert_eq!(ems.process_action(""), Outcome::Ignored);
        assert!(matches!(
            ems.process_option(""),
            Outcome::OptionRejected(OptionError::Empty)
        ));
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn check_counts_stopped_channels() {
        let journal = Journal::default();
        let mut drivers = recorders(3, &journal);
        drivers[0].stops = true;
        drivers[2].stops = true;
        let mut ems = interpreter(&mut drivers);

        assert_eq!(ems.check(), 2);
        assert!(journal.borrow().is_empty());
    }

    #[test]
    fn simulated_channels_run_for_their_signal_length() {
        let clock = ManualClock::new();
        let mut left = SimulatedChannel::with_clock("left", clock.clone());
        let mut right = SimulatedChannel::with_clock("right", clock.clone());
        let mut registry: ChannelRegistry<'_, SimulatedChannel<ManualClock>> =
            ChannelRegistry::new(2).unwrap();
        registry.register(&mut left).unwrap();
        registry.register(&mut right).unwrap();
        let mut ems = Interpreter::new(registry, Grammar::compact());

        ems.process_command("G C0 I10 T300");
        ems.process_command("G C1 I4 T100");
        assert_eq!(ems.registry().get(0).map(|c| c.intensity()), Some(9));

        clock.advance(100);
        assert_eq!(ems.check(), 1);
        clock.advance(200);
        assert_eq!(ems.check(), 1);
        assert_eq!(ems.check(), 0);

        ems.process_command("G C0 T300");
        ems.process_command("G T5");
        assert!(!ems.registry().get(0).is_some_and(|c| c.is_active()));
    }
}
