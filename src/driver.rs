//! Control interface of a single stimulation channel.
//!
//! The real driver (pulse generation, potentiometer, timing) lives outside
//! this crate. [`SimulatedChannel`] is a software stand-in that keeps the same
//! state a hardware channel keeps, so the CLI and tests can observe what the
//! interpreter asked for.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, info};

/// Operations the interpreter invokes on one channel.
pub trait ChannelDriver {
    /// Pulse length in milliseconds.
    fn set_signal_length(&mut self, length_ms: u32);
    fn set_intensity(&mut self, level: i32);
    fn set_max_intensity(&mut self, level: i32);
    fn set_min_intensity(&mut self, level: i32);
    fn activate(&mut self);
    fn deactivate(&mut self);
    /// Commits the configured length and intensity as a pulse.
    fn apply_signal(&mut self);
    /// Periodic self-check. Returns `true` when the channel stopped (pulse
    /// over or fault) during this check.
    fn check(&mut self) -> bool;
}

/// Millisecond time source for simulated channels.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

pub const DEFAULT_MIN_INTENSITY: i32 = 0;
pub const DEFAULT_MAX_INTENSITY: i32 = 255;

/// Software model of one EMS output.
#[derive(Debug, Clone)]
pub struct SimulatedChannel<C: Clock = SystemClock> {
    pub name: String,
    clock: C,
    signal_length: u32,
    intensity: i32,
    min_intensity: i32,
    max_intensity: i32,
    active: bool,
    /// Start of the running pulse, in clock milliseconds.
    pulse_started: Option<u64>,
    pulses: u32,
}

impl SimulatedChannel<SystemClock> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, SystemClock::new())
    }
}

impl<C: Clock> SimulatedChannel<C> {
    pub fn with_clock(name: impl Into<String>, clock: C) -> Self {
        Self {
            name: name.into(),
            clock,
            signal_length: 0,
            intensity: DEFAULT_MIN_INTENSITY,
            min_intensity: DEFAULT_MIN_INTENSITY,
            max_intensity: DEFAULT_MAX_INTENSITY,
            active: false,
            pulse_started: None,
            pulses: 0,
        }
    }

    pub fn signal_length(&self) -> u32 {
        self.signal_length
    }

    pub fn intensity(&self) -> i32 {
        self.intensity
    }

    pub fn min_intensity(&self) -> i32 {
        self.min_intensity
    }

    pub fn max_intensity(&self) -> i32 {
        self.max_intensity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether a committed pulse is still running.
    pub fn is_pulsing(&self) -> bool {
        self.active && self.pulse_started.is_some()
    }

    /// Number of pulses committed since construction.
    pub fn pulse_count(&self) -> u32 {
        self.pulses
    }

    /// Milliseconds left of the running pulse.
    pub fn remaining_ms(&self) -> Option<u64> {
        let started = self.pulse_started?;
        let elapsed = self.clock.now_ms().saturating_sub(started);
        Some(u64::from(self.signal_length).saturating_sub(elapsed))
    }

    fn clamp_intensity(&self, level: i32) -> i32 {
        // `i32::clamp` panics when min > max, which options can produce.
        level.max(self.min_intensity).min(self.max_intensity)
    }
}

impl<C: Clock> ChannelDriver for SimulatedChannel<C> {
    fn set_signal_length(&mut self, length_ms: u32) {
        self.signal_length = length_ms;
    }

    fn set_intensity(&mut self, level: i32) {
        self.intensity = self.clamp_intensity(level);
        if self.intensity != level {
            debug!(
                channel = %self.name,
                requested = level,
                applied = self.intensity,
                "intensity clamped to bounds"
            );
        }
    }

    fn set_max_intensity(&mut self, level: i32) {
        self.max_intensity = level;
        self.intensity = self.clamp_intensity(self.intensity);
    }

    fn set_min_intensity(&mut self, level: i32) {
        self.min_intensity = level;
        self.intensity = self.clamp_intensity(self.intensity);
    }

    fn activate(&mut self) {
        self.active = true;
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.pulse_started = None;
    }

    fn apply_signal(&mut self) {
        if !self.active {
            return;
        }
        self.pulse_started = Some(self.clock.now_ms());
        self.pulses += 1;
        info!(
            channel = %self.name,
            length = self.signal_length,
            intensity = self.intensity,
            "pulse started"
        );
    }

    fn check(&mut self) -> bool {
        match self.remaining_ms() {
            Some(0) => {
                info!(channel = %self.name, "pulse finished");
                self.deactivate();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (SimulatedChannel<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        (SimulatedChannel::with_clock("ch0", clock.clone()), clock)
    }

    #[test]
    fn pulse_stops_after_signal_length() {
        let (mut ch, clock) = channel();
        ch.set_signal_length(500);
        ch.activate();
        ch.apply_signal();
        assert!(ch.is_pulsing());

        clock.advance(499);
        assert!(!ch.check());
        assert_eq!(ch.remaining_ms(), Some(1));

        clock.advance(1);
        assert!(ch.check());
        assert!(!ch.is_active());
        // Reported once only.
        assert!(!ch.check());
    }

    #[test]
    fn apply_without_activation_does_nothing() {
        let (mut ch, _) = channel();
        ch.apply_signal();
        assert!(!ch.is_pulsing());
        assert_eq!(ch.pulse_count(), 0);
    }

    #[test]
    fn intensity_respects_bounds() {
        let (mut ch, _) = channel();
        ch.set_max_intensity(80);
        ch.set_intensity(120);
        assert_eq!(ch.intensity(), 80);

        ch.set_min_intensity(10);
        ch.set_intensity(-1);
        assert_eq!(ch.intensity(), 10);
    }

    #[test]
    fn lowering_max_pulls_current_intensity_down() {
        let (mut ch, _) = channel();
        ch.set_intensity(200);
        ch.set_max_intensity(50);
        assert_eq!(ch.intensity(), 50);
    }

    #[test]
    fn deactivate_cancels_running_pulse() {
        let (mut ch, clock) = channel();
        ch.set_signal_length(100);
        ch.activate();
        ch.apply_signal();
        ch.deactivate();
        clock.advance(200);
        assert!(!ch.check());
        assert_eq!(ch.pulse_count(), 1);
    }
}
