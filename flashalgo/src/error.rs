use crate::config::RegistryError;
use crate::flashing::FlashError;
use crate::DebugProbeError;

/// The overarching error type which contains all possible errors of the crate.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum Error {
    /// An error with the usage of the probe occurred.
    Probe(#[from] DebugProbeError),

    /// Unable to load the description of the chip.
    ChipNotFound(#[from] RegistryError),

    /// The flash algorithm failed.
    Flash(#[from] FlashError),
}
