use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Level;

use super::loader::{self, ExecutionSession, FunctionCode, SessionState};
use super::{
    pipeline, EntryPoint, FillPolicy, FlashAlgorithm, FlashError, FlashLayout, FlashOptions,
    FlashPage, FlashProgress,
};
use crate::{CoreRegister, DebugInterface, DebugProbeError, HaltReason, InstructionSet};
use flashalgo_target::{MemoryRange, NvmRegion, SectorInfo};

pub(super) trait Operation {
    fn operation() -> FunctionCode;
}

pub(super) struct Erase;

impl Operation for Erase {
    fn operation() -> FunctionCode {
        FunctionCode::Erase
    }
}

pub(super) struct Program;

impl Operation for Program {
    fn operation() -> FunctionCode {
        FunctionCode::Program
    }
}

pub(super) struct Verify;

impl Operation for Verify {
    fn operation() -> FunctionCode {
        FunctionCode::Verify
    }
}

/// A structure to control the flash of an attached microchip.
///
/// Once constructed, the flash algorithm of `region` is resident on the
/// target and the flasher can be used to erase and program the region.
pub(crate) struct Flasher<'probe> {
    probe: &'probe mut dyn DebugInterface,
    execution: &'probe mut ExecutionSession,
    region: NvmRegion,
    flash_algorithm: Arc<FlashAlgorithm>,
    progress: FlashProgress,
    clock: Option<u32>,
}

impl<'probe> Flasher<'probe> {
    pub(crate) fn new(
        probe: &'probe mut dyn DebugInterface,
        execution: &'probe mut ExecutionSession,
        region: NvmRegion,
        flash_algorithm: Arc<FlashAlgorithm>,
        options: &FlashOptions,
    ) -> Result<Self, FlashError> {
        flash_algorithm.check_page_size(region.page_size())?;

        let mut this = Self {
            probe,
            execution,
            region,
            flash_algorithm,
            progress: options.progress.clone().unwrap_or_else(FlashProgress::empty),
            clock: options.clock,
        };

        this.load()?;

        Ok(this)
    }

    fn load(&mut self) -> Result<(), FlashError> {
        let resident = self.execution.active_algorithm().cloned();
        if let Some(resident) = resident {
            if !Arc::ptr_eq(&resident, &self.flash_algorithm) {
                tracing::debug!(
                    "Replacing flash algorithm '{}' with '{}'.",
                    resident.name,
                    self.flash_algorithm.name
                );
                uninit_resident(self.probe, self.execution);
            }
        }

        loader::load(self.probe, self.execution, &self.flash_algorithm)
    }

    fn init<O: Operation>(&mut self) -> Result<ActiveFlasher<'_, O>, FlashError> {
        if let SessionState::Initialized(function) = self.execution.state() {
            if function != O::operation() {
                uninit_resident(self.probe, self.execution);
            }
        }

        // A failed uninit can leave the session unloaded.
        self.load()?;

        tracing::debug!("Preparing Flasher for operation {:?}", O::operation());
        let mut flasher = ActiveFlasher::<O> {
            probe: &mut *self.probe,
            execution: &mut *self.execution,
            region: &self.region,
            flash_algorithm: &self.flash_algorithm,
            progress: &self.progress,
            _operation: PhantomData,
        };

        flasher.init(self.clock)?;

        Ok(flasher)
    }

    /// Runs `f` with the algorithm initialized for `O` and uninitializes it afterwards.
    ///
    /// Errors skip the uninit, so an algorithm error leaves the session
    /// initialized. Errors which make the target RAM untrusted unload it.
    fn run<O: Operation, T>(
        &mut self,
        f: impl FnOnce(&mut ActiveFlasher<'_, O>) -> Result<T, FlashError>,
    ) -> Result<T, FlashError> {
        let result = self.init::<O>().and_then(|mut active| {
            let value = f(&mut active)?;
            active.uninit();
            Ok(value)
        });

        if let Err(error) = &result {
            if error.invalidates_session() {
                tracing::debug!("Target RAM is no longer trusted: {error}");
                self.execution.invalidate();
            }
        }

        result
    }

    /// Erases every sector intersecting `address..address + length`.
    pub(crate) fn erase(
        &mut self,
        address: u64,
        length: u64,
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        if length == 0 {
            return Ok(());
        }

        let range = address..address.saturating_add(length);
        if !self.region.range.contains_range(&range) {
            return Err(FlashError::AddressNotInRegion {
                start: range.start,
                end: range.end,
                region: self.region.clone(),
            });
        }

        let sectors: Vec<SectorInfo> = self.region.sectors_in(range).collect();
        self.erase_sectors(&sectors, options)
    }

    fn erase_sectors(
        &mut self,
        sectors: &[SectorInfo],
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        self.progress.started_erasing();

        let result = self.run::<Erase, _>(|active| {
            for sector in sectors {
                if options.aborted() {
                    return Err(FlashError::Aborted {
                        address: sector.base_address,
                    });
                }

                let t = Instant::now();
                active.erase_sector(sector.base_address)?;
                active.progress.sector_erased(sector.size, t.elapsed());
            }
            Ok(())
        });

        if result.is_ok() {
            self.progress.finished_erasing();
        } else {
            self.progress.failed_erasing();
        }

        result
    }

    pub(crate) fn erase_all(&mut self) -> Result<(), FlashError> {
        if self.flash_algorithm.pc_erase_all.is_none() {
            return Err(FlashError::ChipEraseNotSupported);
        }

        self.progress.started_erasing();

        let t = Instant::now();
        let result = self.run::<Erase, _>(|active| active.erase_all());

        if result.is_ok() {
            let size = self.region.range.end - self.region.range.start;
            self.progress.sector_erased(size, t.elapsed());
            self.progress.finished_erasing();
        } else {
            self.progress.failed_erasing();
        }

        result
    }

    /// Program `data` at `address`.
    ///
    /// With `erase` set, the sectors touched by the data are erased first.
    /// Unwritten bytes of the pages are filled as `options.fill` says.
    pub(crate) fn program(
        &mut self,
        address: u64,
        data: &[u8],
        options: &FlashOptions,
        erase: bool,
    ) -> Result<(), FlashError> {
        tracing::debug!("Starting program procedure.");
        let mut layout = FlashLayout::new(&self.region, address, data, options.fill, erase)?;

        if !layout.fills().is_empty() {
            self.fill_pages(&mut layout)?;
        }

        if erase {
            self.erase_sectors(layout.sectors(), options)?;
        }

        self.program_pages(layout.pages(), options)?;

        if options.verify && self.flash_algorithm.analyzer_address.is_some() {
            self.verify_pages(layout.pages())?;
        } else if options.verify {
            tracing::debug!(
                "Flash algorithm '{}' has no analyzer, skipping verification.",
                self.flash_algorithm.name
            );
        }

        Ok(())
    }

    fn program_pages(
        &mut self,
        pages: &[FlashPage],
        options: &FlashOptions,
    ) -> Result<(), FlashError> {
        let buffer_count =
            if options.enable_double_buffering && self.flash_algorithm.double_buffering_supported()
            {
                2
            } else {
                1
            };
        tracing::debug!("Programming {} pages using {buffer_count} buffer(s).", pages.len());

        self.progress.started_programming(pages.len());

        let result = self.run::<Program, _>(|active| {
            pipeline::program_pages(active, pages, buffer_count, options)
        });

        if result.is_ok() {
            self.progress.finished_programming();
        } else {
            self.progress.failed_programming();
        }

        result
    }

    /// Compares `data` at `address` with the flash contents using the analyzer.
    pub(crate) fn verify(&mut self, address: u64, data: &[u8]) -> Result<(), FlashError> {
        if self.flash_algorithm.analyzer_address.is_none() {
            return Err(FlashError::AnalyzerNotSupported);
        }

        // The analyzer checksums whole pages, so the bytes around the data
        // have to be known as well.
        let mut layout = FlashLayout::new(&self.region, address, data, FillPolicy::Restore, false)?;

        if !layout.fills().is_empty() {
            self.fill_pages(&mut layout)?;
        }

        self.verify_pages(layout.pages())
    }

    fn verify_pages(&mut self, pages: &[FlashPage]) -> Result<(), FlashError> {
        self.progress.started_verifying();

        let result = self.run::<Verify, _>(|active| active.verify_pages(pages));

        if result.is_ok() {
            self.progress.finished_verifying();
        } else {
            self.progress.failed_verifying();
        }

        result
    }

    /// Reads the bytes of every fill of `layout` from the flash into its page.
    fn fill_pages(&mut self, layout: &mut FlashLayout) -> Result<(), FlashError> {
        self.progress.started_filling();

        let fills = layout.fills().to_vec();
        let result = self.run::<Verify, _>(|active| {
            for fill in &fills {
                let t = Instant::now();
                let page = &mut layout.pages_mut()[fill.page_index()];
                let offset = (fill.address() - page.address()) as usize;
                let slice = &mut page.data_mut()[offset..offset + fill.size() as usize];

                active
                    .probe
                    .read_memory(fill.address(), slice)
                    .map_err(|source| FlashError::TargetRead {
                        address: fill.address(),
                        length: fill.size() as usize,
                        source,
                    })?;

                active.progress.page_filled(fill.size(), t.elapsed());
            }
            Ok(())
        });

        if result.is_ok() {
            self.progress.finished_filling();
        } else {
            self.progress.failed_filling();
        }

        result
    }
}

/// Calls `UnInit()` of the resident algorithm, if it is initialized.
///
/// This is best effort: a failure is logged, and only unloads the session if
/// the target RAM can no longer be trusted.
pub(crate) fn uninit_resident(probe: &mut dyn DebugInterface, execution: &mut ExecutionSession) {
    let SessionState::Initialized(function) = execution.state() else {
        return;
    };
    let Some(algorithm) = execution.active_algorithm().cloned() else {
        return;
    };

    tracing::debug!("Running uninit routine.");

    let result = match algorithm.pc_uninit {
        Some(pc_uninit) => Registers::value(pc_uninit).and_then(|pc| {
            call_function(
                probe,
                &algorithm,
                &Registers {
                    pc,
                    r0: Some(function.value()),
                    r1: None,
                    r2: None,
                    r3: None,
                },
                false,
            )?;
            wait_for_completion(
                probe,
                EntryPoint::UnInit,
                None,
                Duration::from_millis(algorithm.timeouts.uninit.into()),
            )
        }),
        None => Ok(0),
    };

    match result {
        Ok(0) => {}
        Ok(error_code) => {
            tracing::warn!("UnInit({:?}) returned {error_code}, ignoring.", function);
        }
        Err(error) => {
            tracing::warn!("UnInit({:?}) failed: {error}", function);
            if error.invalidates_session() {
                execution.invalidate();
                return;
            }
        }
    }

    execution.set_initialized(None);
}

pub(super) struct Registers {
    pub(super) pc: u32,
    pub(super) r0: Option<u32>,
    pub(super) r1: Option<u32>,
    pub(super) r2: Option<u32>,
    pub(super) r3: Option<u32>,
}

impl Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}({:?}, {:?}, {:?}, {:?})",
            self.pc, self.r0, self.r1, self.r2, self.r3
        )
    }
}

impl Registers {
    /// Converts an address into a register value.
    pub(super) fn value(val: u64) -> Result<u32, FlashError> {
        val.try_into()
            .map_err(|_| FlashError::RegisterValueNotSupported(val))
    }
}

/// Sets up the registers for a call into `algorithm` and resumes the core.
fn call_function(
    probe: &mut dyn DebugInterface,
    algorithm: &FlashAlgorithm,
    registers: &Registers,
    init: bool,
) -> Result<(), FlashError> {
    tracing::debug!("Calling routine {:?}, init={}", registers, init);

    // For ARM Cortex-M cores, we have to add 1 to the return address,
    // to ensure that we stay in Thumb mode.
    let return_address =
        if probe.instruction_set().map_err(FlashError::Core)? == InstructionSet::Thumb2 {
            algorithm.load_address + 1
        } else {
            algorithm.load_address
        };

    let writes = [
        (CoreRegister::Pc, Some(registers.pc)),
        (CoreRegister::R0, registers.r0),
        (CoreRegister::R1, registers.r1),
        (CoreRegister::R2, registers.r2),
        (CoreRegister::R3, registers.r3),
        (
            CoreRegister::R9,
            if init {
                Some(Registers::value(algorithm.static_base)?)
            } else {
                None
            },
        ),
        (
            CoreRegister::Sp,
            if init {
                Some(Registers::value(algorithm.begin_stack)?)
            } else {
                None
            },
        ),
        (CoreRegister::Lr, Some(Registers::value(return_address)?)),
    ];

    for (register, value) in writes {
        if let Some(value) = value {
            probe
                .write_core_register(register, value)
                .map_err(FlashError::Core)?;

            if tracing::enabled!(Level::TRACE) {
                let actual = probe
                    .read_core_register(register)
                    .map_err(FlashError::Core)?;

                tracing::trace!(
                    "content of {}: 0x{:08x} should be: 0x{:08x}",
                    register,
                    actual,
                    value
                );
            }
        }
    }

    // Resume target operation.
    probe.run().map_err(FlashError::Core)
}

/// Waits for the routine started last to return and reads its result.
fn wait_for_completion(
    probe: &mut dyn DebugInterface,
    entry_point: EntryPoint,
    address: Option<u64>,
    timeout: Duration,
) -> Result<u32, FlashError> {
    tracing::debug!("Waiting for routine call completion.");

    match probe.wait_for_halt(timeout) {
        Ok(HaltReason::Breakpoint | HaltReason::Request) => probe
            .read_core_register(CoreRegister::RESULT)
            .map_err(FlashError::Core),
        Ok(reason) => Err(FlashError::UnexpectedHalt {
            entry_point,
            reason,
        }),
        Err(DebugProbeError::Timeout(_)) => {
            // Leave the core halted, the next call reloads the algorithm anyway.
            if let Err(error) = probe.halt(Duration::from_millis(100)) {
                tracing::warn!("Failed to halt the core after a timeout: {error}");
            }

            Err(FlashError::AlgorithmTimeout {
                entry_point,
                address,
                timeout,
            })
        }
        Err(error) => Err(FlashError::Core(error)),
    }
}

pub(super) struct ActiveFlasher<'a, O: Operation> {
    pub(super) probe: &'a mut dyn DebugInterface,
    execution: &'a mut ExecutionSession,
    pub(super) region: &'a NvmRegion,
    pub(super) flash_algorithm: &'a FlashAlgorithm,
    pub(super) progress: &'a FlashProgress,
    _operation: PhantomData<O>,
}

impl<O: Operation> ActiveFlasher<'_, O> {
    #[tracing::instrument(name = "Call to flash algorithm init", skip(self, clock))]
    fn init(&mut self, clock: Option<u32>) -> Result<(), FlashError> {
        let function = O::operation();

        if self.execution.state() == SessionState::Initialized(function) {
            tracing::debug!("Flash algorithm is already initialized for {:?}.", function);
            return Ok(());
        }

        let algo = self.flash_algorithm;

        // Execute init routine if one is present.
        if let Some(pc_init) = algo.pc_init {
            let result = self.call_function_and_wait(
                &Registers {
                    pc: Registers::value(pc_init)?,
                    r0: Some(Registers::value(self.region.range.start)?),
                    r1: Some(clock.unwrap_or(0)),
                    r2: Some(function.value()),
                    r3: None,
                },
                true,
                EntryPoint::Init,
                None,
                Duration::from_millis(algo.timeouts.init.into()),
            )?;

            if result != 0 {
                return Err(FlashError::AlgorithmError {
                    entry_point: EntryPoint::Init,
                    address: None,
                    error_code: result,
                });
            }
        } else {
            // Later calls rely on the static base and stack set up by Init().
            for (register, value) in [
                (CoreRegister::R9, algo.static_base),
                (CoreRegister::Sp, algo.begin_stack),
            ] {
                self.probe
                    .write_core_register(register, Registers::value(value)?)
                    .map_err(FlashError::Core)?;
            }
        }

        self.execution.set_initialized(Some(function));

        Ok(())
    }

    fn uninit(&mut self) {
        uninit_resident(self.probe, self.execution);
    }

    pub(super) fn call_function_and_wait(
        &mut self,
        registers: &Registers,
        init: bool,
        entry_point: EntryPoint,
        address: Option<u64>,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        self.call_function(registers, init)?;
        self.wait_for_completion(entry_point, address, timeout)
    }

    fn call_function(&mut self, registers: &Registers, init: bool) -> Result<(), FlashError> {
        call_function(self.probe, self.flash_algorithm, registers, init)
    }

    #[tracing::instrument(skip(self))]
    fn wait_for_completion(
        &mut self,
        entry_point: EntryPoint,
        address: Option<u64>,
        timeout: Duration,
    ) -> Result<u32, FlashError> {
        wait_for_completion(self.probe, entry_point, address, timeout)
    }
}

impl ActiveFlasher<'_, Erase> {
    pub(super) fn erase_all(&mut self) -> Result<(), FlashError> {
        tracing::debug!("Erasing entire chip.");
        let algo = self.flash_algorithm;

        let Some(pc_erase_all) = algo.pc_erase_all else {
            return Err(FlashError::ChipEraseNotSupported);
        };

        let result = self.call_function_and_wait(
            &Registers {
                pc: Registers::value(pc_erase_all)?,
                r0: None,
                r1: None,
                r2: None,
                r3: None,
            },
            false,
            EntryPoint::EraseAll,
            None,
            Duration::from_millis(algo.timeouts.erase_all.into()),
        )?;

        if result != 0 {
            Err(FlashError::AlgorithmError {
                entry_point: EntryPoint::EraseAll,
                address: None,
                error_code: result,
            })
        } else {
            Ok(())
        }
    }

    pub(super) fn erase_sector(&mut self, address: u64) -> Result<(), FlashError> {
        tracing::info!("Erasing sector at address 0x{:08x}", address);
        let t1 = Instant::now();
        let algo = self.flash_algorithm;

        let result = self.call_function_and_wait(
            &Registers {
                pc: Registers::value(algo.pc_erase_sector)?,
                r0: Some(Registers::value(address)?),
                r1: None,
                r2: None,
                r3: None,
            },
            false,
            EntryPoint::EraseSector,
            Some(address),
            Duration::from_millis(algo.timeouts.erase_sector.into()),
        )?;
        tracing::info!(
            "Done erasing sector. Result is {}. This took {:?}",
            result,
            t1.elapsed()
        );

        if result != 0 {
            Err(FlashError::AlgorithmError {
                entry_point: EntryPoint::EraseSector,
                address: Some(address),
                error_code: result,
            })
        } else {
            Ok(())
        }
    }
}

impl ActiveFlasher<'_, Program> {
    /// Starts `ProgramPage()` for the page at `address` from page buffer `buffer_number`.
    ///
    /// The call has to be finished with [`Self::wait_for_program_page`].
    pub(super) fn start_program_page_with_buffer(
        &mut self,
        address: u64,
        size: u32,
        buffer_number: usize,
    ) -> Result<(), FlashError> {
        let algo = self.flash_algorithm;

        // Ensure the buffer number is valid, otherwise there is a bug somewhere
        // in the flashing code.
        assert!(
            buffer_number < algo.page_buffers.len(),
            "Trying to use non-existing buffer ({}/{}) for flashing. This is a bug. Please report it.",
            buffer_number,
            algo.page_buffers.len()
        );

        tracing::info!(
            "Flashing page at address {:#010x} with size: {} from buffer {}",
            address,
            size,
            buffer_number
        );

        self.call_function(
            &Registers {
                pc: Registers::value(algo.pc_program_page)?,
                r0: Some(Registers::value(address)?),
                r1: Some(size),
                r2: Some(Registers::value(algo.page_buffers[buffer_number])?),
                r3: None,
            },
            false,
        )
    }

    /// Waits for the `ProgramPage()` call of the page at `address` to finish.
    pub(super) fn wait_for_program_page(&mut self, address: u64) -> Result<(), FlashError> {
        let timeout = Duration::from_millis(self.flash_algorithm.timeouts.program_page.into());
        let result = self.wait_for_completion(EntryPoint::ProgramPage, Some(address), timeout)?;

        if result != 0 {
            Err(FlashError::AlgorithmError {
                entry_point: EntryPoint::ProgramPage,
                address: Some(address),
                error_code: result,
            })
        } else {
            Ok(())
        }
    }

    /// Transfers `bytes` into page buffer `buffer_number`.
    pub(super) fn load_page_buffer(
        &mut self,
        bytes: &[u8],
        buffer_number: usize,
    ) -> Result<(), FlashError> {
        let algo = self.flash_algorithm;

        // Ensure the buffer number is valid, otherwise there is a bug somewhere
        // in the flashing code.
        assert!(
            buffer_number < algo.page_buffers.len(),
            "Trying to use non-existing buffer ({}/{}) for flashing. This is a bug. Please report it.",
            buffer_number,
            algo.page_buffers.len()
        );

        let address = algo.page_buffers[buffer_number];

        let t1 = Instant::now();
        self.probe
            .write_memory(address, bytes)
            .map_err(|source| FlashError::TargetWrite {
                address,
                length: bytes.len(),
                source,
            })?;

        tracing::info!(
            "Took {:?} to download {} byte page into ram",
            t1.elapsed(),
            bytes.len()
        );

        self.execution.set_current_buffer(buffer_number);

        Ok(())
    }
}
