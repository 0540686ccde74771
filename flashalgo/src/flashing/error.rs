use std::time::Duration;

use thiserror::Error;

use super::EntryPoint;
use crate::{DebugProbeError, HaltReason};
use flashalgo_target::NvmRegion;

/// Describes any error that happened during the or in preparation for the flashing procedure.
#[derive(Error, Debug)]
pub enum FlashError {
    /// No memory region of the target contains the address.
    #[error("No memory region contains the address {0:#010x}.")]
    AddressNotMapped(u64),

    /// The region containing the address is not flash, or has no algorithm attached.
    #[error("There is no flash algorithm for the memory at {address:#010x}.")]
    NoAlgorithm {
        /// The requested address.
        address: u64,
    },

    /// The requested range does not lie inside the flash region.
    #[error("The range {start:#010x}..{end:#010x} is not contained in {region:?}")]
    AddressNotInRegion {
        /// Start of the requested range.
        start: u64,
        /// End of the requested range.
        end: u64,
        /// The region the operation was requested for.
        region: NvmRegion,
    },

    /// Writing target memory failed.
    #[error("Failed to write {length} bytes of target memory at {address:#010x}")]
    TargetWrite {
        /// The start address of the write.
        address: u64,
        /// The amount of bytes written.
        length: usize,
        /// The transport error.
        #[source]
        source: DebugProbeError,
    },

    /// Reading target memory failed.
    #[error("Failed to read {length} bytes of target memory at {address:#010x}")]
    TargetRead {
        /// The start address of the read.
        address: u64,
        /// The amount of bytes requested.
        length: usize,
        /// The transport error.
        #[source]
        source: DebugProbeError,
    },

    /// Something during the interaction with the core went wrong.
    #[error("Something during the interaction with the core went wrong")]
    Core(#[source] DebugProbeError),

    /// The flash algorithm returned a non-zero result.
    #[error("The execution of '{entry_point}'{} failed with code {error_code}.", address_suffix(.address))]
    AlgorithmError {
        /// The entry point which failed.
        entry_point: EntryPoint,
        /// The address passed to the entry point, if any.
        address: Option<u64>,
        /// The value returned in `R0`.
        error_code: u32,
    },

    /// The core did not return from the flash algorithm in time.
    #[error("The execution of '{entry_point}'{} did not finish within {timeout:?}.", address_suffix(.address))]
    AlgorithmTimeout {
        /// The entry point which hung.
        entry_point: EntryPoint,
        /// The address passed to the entry point, if any.
        address: Option<u64>,
        /// The watchdog which expired.
        timeout: Duration,
    },

    /// The core halted for another reason than reaching the return breakpoint.
    #[error("The core halted unexpectedly ({reason:?}) while executing '{entry_point}'.")]
    UnexpectedHalt {
        /// The entry point which was running.
        entry_point: EntryPoint,
        /// Why the core halted.
        reason: HaltReason,
    },

    /// The CRC computed on the target does not match the data.
    #[error("Verification of the page at {address:#010x} failed: expected CRC {expected:#010x}, target computed {actual:#010x}.")]
    VerificationError {
        /// The address of the mismatching page.
        address: u64,
        /// The CRC of the host data.
        expected: u32,
        /// The CRC computed by the target.
        actual: u32,
    },

    /// An address does not fit into a 32 bit core register.
    #[error("The value {0:#x} cannot be passed in a 32 bit register.")]
    RegisterValueNotSupported(u64),

    /// The flash algorithm has no `EraseChip()` entry point.
    #[error("The flash algorithm does not support erasing the whole chip.")]
    ChipEraseNotSupported,

    /// The flash algorithm has no analyzer configured.
    #[error("The flash algorithm does not provide an analyzer for verification.")]
    AnalyzerNotSupported,

    /// The flash algorithm description violates the RAM layout rules.
    #[error("The flash algorithm '{name}' is invalid: {reason}")]
    InvalidFlashAlgorithm {
        /// The name of the flash algorithm.
        name: String,
        /// Which rule is violated.
        reason: String,
    },

    /// The algorithm image read back from RAM differs from what was written.
    #[error(
        "The RAM contents did not match the expected contents after loading the flash algorithm."
    )]
    FlashAlgorithmNotLoaded,

    /// The operation was cancelled through its abort handle.
    #[error("The operation was aborted before {address:#010x}.")]
    Aborted {
        /// The first page or sector which was not touched.
        address: u64,
    },
}

impl FlashError {
    /// Whether the RAM contents of the target are no longer trusted after this
    /// error, so the algorithm has to be loaded again before the next call.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            FlashError::TargetWrite { .. }
                | FlashError::TargetRead { .. }
                | FlashError::Core(_)
                | FlashError::AlgorithmTimeout { .. }
                | FlashError::UnexpectedHalt { .. }
                | FlashError::FlashAlgorithmNotLoaded
        )
    }
}

fn address_suffix(address: &Option<u64>) -> String {
    match address {
        Some(address) => format!(" at {address:#010x}"),
        None => String::new(),
    }
}
