use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use super::FlashProgress;

/// What to put into the bytes of a page which are not covered by the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Use the erased byte value of the flash region.
    #[default]
    Erased,
    /// Use a fixed byte.
    Value(u8),
    /// Read the current flash contents, so they are written again unchanged.
    Restore,
}

impl FillPolicy {
    /// The byte used for padding, before any flash contents are restored.
    pub(super) fn byte(&self, erased_byte_value: u8) -> u8 {
        match self {
            FillPolicy::Value(value) => *value,
            FillPolicy::Erased | FillPolicy::Restore => erased_byte_value,
        }
    }
}

/// Cancels a running erase or program operation from another thread.
///
/// The operation stops before the next sector or page; a call which is
/// already running on the target is waited for first.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a new handle which is not aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the operation to stop.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Clear the abort request, so the handle can be used again.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }
}

/// Options for erasing and programming flash.
pub struct FlashOptions {
    /// The clock frequency passed to `Init()`. `0` is passed if unset.
    pub clock: Option<u32>,
    /// Transfer the next page while the previous one is programmed, if the
    /// flash algorithm has two page buffers.
    pub enable_double_buffering: bool,
    /// Check the CRC of the programmed pages with the analyzer, if the flash
    /// algorithm provides one.
    pub verify: bool,
    /// Content of the parts of a page which are not covered by the data.
    pub fill: FillPolicy,
    /// An optional handle to cancel the operation.
    pub abort: Option<AbortHandle>,
    /// An optional progress reporter.
    pub progress: Option<FlashProgress>,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            clock: None,
            enable_double_buffering: true,
            verify: true,
            fill: FillPolicy::default(),
            abort: None,
            progress: None,
        }
    }
}

impl FlashOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the abort handle, if any, was triggered.
    pub(super) fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortHandle::is_aborted)
    }
}
