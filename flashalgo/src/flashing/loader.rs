use std::sync::Arc;
use std::time::Duration;

use super::analyzer::ANALYZER;
use super::{FlashAlgorithm, FlashError};
use crate::DebugInterface;

/// The function code handed to `Init()` and `UnInit()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// Prepare for erasing.
    Erase = 1,
    /// Prepare for programming.
    Program = 2,
    /// Prepare for verifying.
    Verify = 3,
}

impl FunctionCode {
    /// The raw value passed in the argument register.
    pub fn value(self) -> u32 {
        self as u32
    }
}

/// The state of the flash algorithm on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No trusted algorithm image is resident in RAM.
    Unloaded,
    /// The algorithm image is resident, but `Init()` has not been called.
    Loaded,
    /// `Init()` succeeded for the given function.
    Initialized(FunctionCode),
}

/// Tracks which flash algorithm is resident on a target and what it was
/// initialized for.
///
/// There is exactly one of these per connected target, owned by its
/// [`Session`](crate::Session).
#[derive(Debug, Default)]
pub struct ExecutionSession {
    active_algorithm: Option<Arc<FlashAlgorithm>>,
    initialized: Option<FunctionCode>,
    current_buffer: usize,
}

impl ExecutionSession {
    /// A session for a target without a resident algorithm.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state of the algorithm on the target.
    pub fn state(&self) -> SessionState {
        match (&self.active_algorithm, self.initialized) {
            (None, _) => SessionState::Unloaded,
            (Some(_), None) => SessionState::Loaded,
            (Some(_), Some(function)) => SessionState::Initialized(function),
        }
    }

    /// The algorithm which is resident in target RAM.
    pub fn active_algorithm(&self) -> Option<&Arc<FlashAlgorithm>> {
        self.active_algorithm.as_ref()
    }

    /// The page buffer which was filled last.
    pub fn current_buffer(&self) -> usize {
        self.current_buffer
    }

    /// Whether `algorithm` is the one resident in target RAM.
    pub fn is_resident(&self, algorithm: &Arc<FlashAlgorithm>) -> bool {
        self.active_algorithm
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, algorithm))
    }

    /// Forget everything about the target RAM, the next operation loads the algorithm again.
    pub(crate) fn invalidate(&mut self) {
        self.active_algorithm = None;
        self.initialized = None;
        self.current_buffer = 0;
    }

    pub(super) fn set_initialized(&mut self, function: Option<FunctionCode>) {
        self.initialized = function;
    }

    pub(super) fn set_current_buffer(&mut self, buffer: usize) {
        self.current_buffer = buffer;
    }
}

/// Puts `algorithm` into the RAM of the target.
///
/// Nothing is transferred if the algorithm is already resident.
pub(super) fn load(
    probe: &mut dyn DebugInterface,
    execution: &mut ExecutionSession,
    algorithm: &Arc<FlashAlgorithm>,
) -> Result<(), FlashError> {
    if execution.is_resident(algorithm) {
        tracing::debug!("Flash algorithm '{}' is already loaded.", algorithm.name);
        return Ok(());
    }

    // Whatever was resident before is gone from here on.
    execution.invalidate();

    tracing::debug!("Halting core");
    probe
        .halt(Duration::from_millis(100))
        .map_err(FlashError::Core)?;

    // Load flash algorithm code into target RAM.
    let span = tracing::debug_span!(
        "Loading algorithm into RAM",
        address = algorithm.load_address
    )
    .entered();

    probe
        .write_32(algorithm.load_address, &algorithm.instructions)
        .map_err(|source| FlashError::TargetWrite {
            address: algorithm.load_address,
            length: algorithm.instructions.len() * 4,
            source,
        })?;

    if let Some(analyzer_address) = algorithm.analyzer_address {
        probe
            .write_32(analyzer_address, &ANALYZER)
            .map_err(|source| FlashError::TargetWrite {
                address: analyzer_address,
                length: ANALYZER.len() * 4,
                source,
            })?;
    }

    drop(span);

    let mut data = vec![0; algorithm.instructions.len()];
    probe
        .read_32(algorithm.load_address, &mut data)
        .map_err(|source| FlashError::TargetRead {
            address: algorithm.load_address,
            length: algorithm.instructions.len() * 4,
            source,
        })?;

    for (offset, (original, read_back)) in algorithm.instructions.iter().zip(data.iter()).enumerate()
    {
        if original != read_back {
            tracing::error!(
                "Failed to verify flash algorithm. Data mismatch at address {:#010x}",
                algorithm.load_address + (4 * offset) as u64
            );
            tracing::error!("Original instruction: {:#010x}", original);
            tracing::error!("Readback instruction: {:#010x}", read_back);

            return Err(FlashError::FlashAlgorithmNotLoaded);
        }
    }

    tracing::debug!("RAM contents match flashing algo blob.");

    execution.active_algorithm = Some(algorithm.clone());

    Ok(())
}
