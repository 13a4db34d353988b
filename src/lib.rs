//! # EMS Command Interpreter Library
//!
//! This library contains the command layer of an electrical muscle stimulation
//! (EMS) board. It parses the text commands arriving over the serial link,
//! validates them against the registered output channels and drives each
//! channel through the [`ChannelDriver`] interface.
//!
//! ```
//! use ems_sys::{ChannelRegistry, Grammar, Interpreter, Outcome, SimulatedChannel};
//!
//! let mut left = SimulatedChannel::new("left");
//! let mut right = SimulatedChannel::new("right");
//!
//! let mut registry: ChannelRegistry<'_, SimulatedChannel> = ChannelRegistry::new(2)?;
//! registry.register(&mut left)?;
//! registry.register(&mut right)?;
//!
//! let mut ems = Interpreter::new(registry, Grammar::compact());
//! assert_eq!(ems.process_command("G C1 I5 T800"), Outcome::Dispatched { channel: 1 });
//! assert_eq!(ems.registry().get(1).map(|c| c.signal_length()), Some(800));
//! # Ok::<(), ems_sys::RegistryError>(())
//! ```

pub mod command;
pub mod driver;
pub mod error;
pub mod grammar;
pub mod interpreter;
pub mod registry;
pub mod stimulation;

pub use command::{ActionCommand, OptionCommand, OptionKind, MAX_SIGNAL_LENGTH};
pub use driver::{ChannelDriver, Clock, ManualClock, SimulatedChannel, SystemClock};
pub use error::{ActionError, OptionError, RegistryError, TimelineError};
pub use grammar::{CommandShape, Grammar};
pub use interpreter::{Interpreter, Outcome, Phase, Route, ShutdownCause};
pub use registry::ChannelRegistry;
pub use stimulation::{Sequence, Stimulation, Timeline, TimelineEntry};
