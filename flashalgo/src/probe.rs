//! The seam between the flash engine and a debug transport.

use std::{fmt, time::Duration};

/// The core registers which are touched when calling into a flash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreRegister {
    /// First argument and result register.
    R0,
    /// Second argument register.
    R1,
    /// Third argument register.
    R2,
    /// Fourth argument register.
    R3,
    /// Static base register of position independent code.
    R9,
    /// Stack pointer.
    Sp,
    /// Link register, holds the return address.
    Lr,
    /// Program counter.
    Pc,
}

impl CoreRegister {
    /// The register holding the return value of a routine.
    pub const RESULT: CoreRegister = CoreRegister::R0;

    /// The conventional name of the register.
    pub fn name(&self) -> &'static str {
        match self {
            CoreRegister::R0 => "R0",
            CoreRegister::R1 => "R1",
            CoreRegister::R2 => "R2",
            CoreRegister::R3 => "R3",
            CoreRegister::R9 => "R9",
            CoreRegister::Sp => "SP",
            CoreRegister::Lr => "LR",
            CoreRegister::Pc => "PC",
        }
    }
}

impl fmt::Display for CoreRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The reason why a core was halted.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HaltReason {
    /// Core halted due to a breakpoint.
    ///
    /// This is how a flash algorithm routine returns: `LR` points at a
    /// breakpoint instruction at the start of the algorithm image.
    Breakpoint,
    /// Core halted because of a debugger request.
    Request,
    /// Core halted due to an exception, e.g. a hard fault.
    Exception,
    /// The core is locked up and cannot continue.
    LockedUp,
}

/// The instruction set the core is executing.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum InstructionSet {
    /// ARM Thumb 2 instruction set, used by Cortex-M cores.
    Thumb2,
    /// ARM A32 (ARM) instruction set.
    A32,
}

/// An error reported by the debug transport.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum DebugProbeError {
    /// The core did not halt within {0:?}.
    Timeout(Duration),

    /// The operation requires the core to be halted.
    NotHalted,

    /// {0}
    Other(#[from] anyhow::Error),
}

/// The operations the flash engine needs from a debug probe attached to a
/// single core.
///
/// Implementations must not retry on their own: a failure is reported as is,
/// and the engine decides how the state of the target is affected.
pub trait DebugInterface {
    /// Write a block of bytes to the target memory at `address`.
    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<(), DebugProbeError>;

    /// Read `data.len()` bytes of target memory starting at `address`.
    fn read_memory(&mut self, address: u64, data: &mut [u8]) -> Result<(), DebugProbeError>;

    /// Write a core register. The core must be halted.
    fn write_core_register(
        &mut self,
        register: CoreRegister,
        value: u32,
    ) -> Result<(), DebugProbeError>;

    /// Read a core register. The core must be halted.
    fn read_core_register(&mut self, register: CoreRegister) -> Result<u32, DebugProbeError>;

    /// Halt the core and wait up to `timeout` for it to stop.
    fn halt(&mut self, timeout: Duration) -> Result<(), DebugProbeError>;

    /// Resume the core without waiting for anything.
    fn run(&mut self) -> Result<(), DebugProbeError>;

    /// Wait until the core halts.
    ///
    /// Returns [`DebugProbeError::Timeout`] if it is still running after `timeout`.
    fn wait_for_halt(&mut self, timeout: Duration) -> Result<HaltReason, DebugProbeError>;

    /// The instruction set the core is currently executing.
    fn instruction_set(&mut self) -> Result<InstructionSet, DebugProbeError> {
        Ok(InstructionSet::Thumb2)
    }

    /// Resume the core and block until it halts again.
    fn run_to_breakpoint_or_halt(
        &mut self,
        timeout: Duration,
    ) -> Result<HaltReason, DebugProbeError> {
        self.run()?;
        self.wait_for_halt(timeout)
    }

    /// Write a block of 32 bit words in little endian order.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), DebugProbeError> {
        let bytes: Vec<u8> = data.iter().flat_map(|word| word.to_le_bytes()).collect();
        self.write_memory(address, &bytes)
    }

    /// Read a block of 32 bit words in little endian order.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), DebugProbeError> {
        let mut bytes = vec![0; data.len() * 4];
        self.read_memory(address, &mut bytes)?;

        for (word, chunk) in data.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        Ok(())
    }
}
