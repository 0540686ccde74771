use std::sync::Arc;
use std::time::Duration;

/// Reports the progress of an erase, program or verify operation.
///
/// The handler is called synchronously from the thread running the
/// operation, once per [`ProgressEvent`].
///
/// # Example
///
/// ```
/// use flashalgo::flashing::{FlashProgress, ProgressEvent};
///
/// let progress = FlashProgress::new(|event| {
///     if let ProgressEvent::PageProgrammed { size, time } = event {
///         println!("{size} bytes in {time:?}");
///     }
/// });
/// ```
#[derive(Clone)]
pub struct FlashProgress {
    handler: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl FlashProgress {
    /// Report every event to `handler`.
    pub fn new(handler: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// A reporter which drops all events.
    pub fn empty() -> Self {
        Self::new(|_| {})
    }

    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn started_filling(&self) {
        self.emit(ProgressEvent::StartedFilling);
    }

    pub(super) fn page_filled(&self, size: u64, time: Duration) {
        self.emit(ProgressEvent::PageFilled { size, time });
    }

    pub(super) fn failed_filling(&self) {
        self.emit(ProgressEvent::FailedFilling);
    }

    pub(super) fn finished_filling(&self) {
        self.emit(ProgressEvent::FinishedFilling);
    }

    pub(super) fn started_erasing(&self) {
        self.emit(ProgressEvent::StartedErasing);
    }

    pub(super) fn sector_erased(&self, size: u64, time: Duration) {
        self.emit(ProgressEvent::SectorErased { size, time });
    }

    pub(super) fn failed_erasing(&self) {
        self.emit(ProgressEvent::FailedErasing);
    }

    pub(super) fn finished_erasing(&self) {
        self.emit(ProgressEvent::FinishedErasing);
    }

    pub(super) fn started_programming(&self, pages: usize) {
        self.emit(ProgressEvent::StartedProgramming { pages });
    }

    pub(super) fn page_programmed(&self, size: u32, time: Duration) {
        self.emit(ProgressEvent::PageProgrammed { size, time });
    }

    pub(super) fn failed_programming(&self) {
        self.emit(ProgressEvent::FailedProgramming);
    }

    pub(super) fn finished_programming(&self) {
        self.emit(ProgressEvent::FinishedProgramming);
    }

    pub(super) fn started_verifying(&self) {
        self.emit(ProgressEvent::StartedVerifying);
    }

    pub(super) fn failed_verifying(&self) {
        self.emit(ProgressEvent::FailedVerifying);
    }

    pub(super) fn finished_verifying(&self) {
        self.emit(ProgressEvent::FinishedVerifying);
    }
}

/// Events of a flash operation.
///
/// A successful `program_at` reports, in this order:
///
/// * `StartedFilling`
/// * `PageFilled` for every page with restored bytes
/// * `FinishedFilling`
/// * `StartedErasing`
/// * `SectorErased` for every sector
/// * `FinishedErasing`
/// * `StartedProgramming`
/// * `PageProgrammed` for every page
/// * `FinishedProgramming`
/// * `StartedVerifying`
/// * `FinishedVerifying`
///
/// Filling only happens when unwritten bytes are restored, erasing only when
/// the operation erases, and verifying only when the algorithm has an analyzer.
/// A stage which fails ends with its `Failed*` event, and nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Reading the current contents of partially written pages has started.
    StartedFilling,
    /// The unwritten bytes of a page have been read back.
    PageFilled {
        /// The amount of bytes read.
        size: u64,
        /// The time it took to read them.
        time: Duration,
    },
    /// Filling of the pages has failed.
    FailedFilling,
    /// Filling of the pages has finished successfully.
    FinishedFilling,
    /// The first `EraseSector()` or `EraseChip()` call is about to start.
    StartedErasing,
    /// `EraseSector()` returned success, or `EraseChip()` for the whole region.
    SectorErased {
        /// Bytes erased by the call.
        size: u64,
        /// Duration of the call.
        time: Duration,
    },
    /// An erase call failed, timed out or was aborted.
    FailedErasing,
    /// All erase calls returned success.
    FinishedErasing,
    /// The first page is about to be transferred.
    StartedProgramming {
        /// Number of `ProgramPage()` calls which will follow.
        pages: usize,
    },
    /// `ProgramPage()` returned success for one page.
    PageProgrammed {
        /// Size of the page.
        size: u32,
        /// Time since the page was handed to the algorithm.
        time: Duration,
    },
    /// A page could not be programmed, or the operation was aborted.
    FailedProgramming,
    /// Every page was programmed.
    FinishedProgramming,
    /// Verification of the programmed pages has started.
    StartedVerifying,
    /// Verification failed or found a mismatching page.
    FailedVerifying,
    /// All verified pages match.
    FinishedVerifying,
}
