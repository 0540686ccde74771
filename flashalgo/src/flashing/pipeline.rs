//! Page programming with overlapped transfers.
//!
//! While the target runs `ProgramPage()` on one page buffer, the next page
//! is transferred into the other one. Only one call is outstanding at any
//! time, and a buffer is never written before the call which last used it
//! has returned.

use std::time::Instant;

use super::flasher::{ActiveFlasher, Program};
use super::{FlashError, FlashOptions, FlashPage};

/// Programs `pages` in order, using the first `buffer_count` page buffers.
///
/// If the abort handle of `options` triggers, the call in flight is waited
/// for and [`FlashError::Aborted`] names the first page which was not started.
pub(super) fn program_pages(
    active: &mut ActiveFlasher<'_, Program>,
    pages: &[FlashPage],
    buffer_count: usize,
    options: &FlashOptions,
) -> Result<(), FlashError> {
    let mut in_flight: Option<&FlashPage> = None;
    let mut t = Instant::now();

    for (index, page) in pages.iter().enumerate() {
        if options.aborted() {
            tracing::debug!("Programming aborted before {:#010x}", page.address());
            if let Some(previous) = in_flight {
                finish(active, previous, &mut t)?;
            }
            return Err(FlashError::Aborted {
                address: page.address(),
            });
        }

        let buffer = index % buffer_count;

        // With a single buffer, the device may still be reading it.
        if buffer_count == 1 {
            if let Some(previous) = in_flight.take() {
                finish(active, previous, &mut t)?;
            }
        }

        active.load_page_buffer(page.data(), buffer)?;

        if let Some(previous) = in_flight.take() {
            finish(active, previous, &mut t)?;
        }

        active.start_program_page_with_buffer(page.address(), page.size(), buffer)?;
        in_flight = Some(page);
    }

    if let Some(previous) = in_flight {
        finish(active, previous, &mut t)?;
    }

    Ok(())
}

fn finish(
    active: &mut ActiveFlasher<'_, Program>,
    page: &FlashPage,
    t: &mut Instant,
) -> Result<(), FlashError> {
    active.wait_for_program_page(page.address())?;
    active.progress.page_programmed(page.size(), t.elapsed());
    *t = Instant::now();

    Ok(())
}
