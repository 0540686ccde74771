//! # Flash algorithm execution engine
//!
//! Most microcontrollers cannot have their flash written directly through
//! the debug port. Instead a small, position independent *flash algorithm*
//! is downloaded into the RAM of the target, and the debugger calls its entry
//! points (`Init`, `EraseSector`, `ProgramPage`, ...) by setting up the core
//! registers and letting the core run until it hits a breakpoint.
//!
//! This crate implements that procedure on top of a narrow [`DebugInterface`]:
//! loading the algorithm, the erase / program state machine, double buffered
//! page programming and on-target CRC verification.
//!
//! # Examples
//!
//! ## Programming a chip
//!
//! ```no_run
//! # fn probe() -> Box<dyn flashalgo::DebugInterface> { unimplemented!() }
//! use flashalgo::{flashing::FlashOptions, Session};
//!
//! // Any transport implementing `DebugInterface`.
//! let probe = probe();
//!
//! let mut session = Session::attach(probe, "MKW24D512xxx5")?;
//!
//! let firmware = [0xaa; 0x1000];
//! session.program_at(0x0, &firmware, &FlashOptions::default())?;
//! # Ok::<(), flashalgo::Error>(())
//! ```
//!
//! The crate is built around three main interfaces: the [`DebugInterface`]
//! trait, the [`Target`] description and the [`Session`] struct.

pub mod config;
mod error;
#[warn(missing_docs)]
pub mod flashing;
mod probe;
mod session;


pub use crate::config::{Registry, RegistryError, Target};
pub use crate::error::Error;
pub use crate::probe::{CoreRegister, DebugInterface, DebugProbeError, HaltReason, InstructionSet};
pub use crate::session::Session;
