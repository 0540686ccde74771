//! Flash programming operations.
//!
//! This module runs flash algorithms on the target: it loads an algorithm
//! into RAM, calls its `Init`, `EraseSector`, `ProgramPage` and `UnInit`
//! entry points, and checks the result with the on-target CRC analyzer.
//!
//! The usual way to use it is through [`Session`](crate::Session), which
//! picks the algorithm for an address from the [`Target`](crate::Target).
//!
//! ## Examples
//!
//! ### Erasing and programming a region
//!
//! ```no_run
//! # fn probe() -> Box<dyn flashalgo::DebugInterface> { unimplemented!() }
//! use flashalgo::{flashing::{FillPolicy, FlashOptions}, Session};
//!
//! let mut session = Session::attach(probe(), "MKW24D512xxx5")?;
//! let region = session.target().nvm_regions().next().unwrap().clone();
//!
//! let options = FlashOptions {
//!     fill: FillPolicy::Restore,
//!     ..Default::default()
//! };
//!
//! session.erase(&region, 0x1000, 0x800, &options)?;
//! session.program(&region, 0x1000, &[0x1, 0x2, 0x3, 0x4], &options)?;
//!
//! # Ok::<(), anyhow::Error>(())
//! ```

mod analyzer;
mod builder;
mod error;
mod flash_algorithm;
mod flasher;
mod loader;
mod options;
mod pipeline;
mod progress;

#[cfg(any(test, feature = "test"))]
pub(crate) use analyzer::crc32;
pub(crate) use flasher::{uninit_resident, Flasher};

pub use builder::{FlashFill, FlashLayout, FlashPage};
pub use error::*;
pub use flash_algorithm::*;
pub use loader::{ExecutionSession, FunctionCode, SessionState};
pub use options::*;
pub use progress::*;
