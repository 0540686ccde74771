//! On-target CRC verification.
//!
//! The analyzer is a small routine which computes the CRC32 of flash
//! ranges on the target, so that verifying a page only needs a few words to
//! be transferred instead of the whole page.

use std::time::Duration;

use crc::{Crc, CRC_32_ISO_HDLC};

use super::flasher::{ActiveFlasher, Registers, Verify};
use super::{EntryPoint, FlashError, FlashPage};

/// Room reserved for the analyzer code and the CRC table it builds behind it.
pub(crate) const ANALYZER_SIZE: u64 = 0x600;

/// Position independent Thumb code of the analyzer.
///
/// `analyzer(commands, count)` replaces each of the `count` command words at
/// `commands` with the CRC32 of the range the command describes.
pub(crate) const ANALYZER: [u32; 49] = [
    0x2780b5f0, 0x25004684, 0x4e2b2401, 0x447e4a2b, 0x0023007f, 0x425b402b, 0x40130868, 0x08584043,
    0x425b4023, 0x40584013, 0x40200843, 0x40104240, 0x08434058, 0x42404020, 0x40584010, 0x40200843,
    0x40104240, 0x08434058, 0x42404020, 0x40584010, 0x40200843, 0x40104240, 0x08584043, 0x425b4023,
    0x40434013, 0xc6083501, 0xd1d242bd, 0xd01f2900, 0x46602301, 0x469c25ff, 0x00894e11, 0x447e1841,
    0x88034667, 0x409f8844, 0x2f00409c, 0x2201d012, 0x4252193f, 0x34017823, 0x402b4053, 0x599b009b,
    0x405a0a12, 0xd1f542bc, 0xc00443d2, 0xd1e74281, 0xbdf02000, 0xe7f82200, 0x000000b2, 0xedb88320,
    0x00000042,
];

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The CRC the analyzer computes for `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Encodes the analyzer command for the range `address..address + size`.
///
/// `size` has to be a power of two and `address` a multiple of it.
pub(crate) fn command(address: u64, size: u32) -> Option<u32> {
    if !size.is_power_of_two() || address % size as u64 != 0 {
        return None;
    }

    let index = u32::try_from(address / size as u64).ok()?;
    if index > u16::MAX as u32 {
        return None;
    }

    Some(size.trailing_zeros() | (index << 16))
}

impl ActiveFlasher<'_, Verify> {
    /// Computes the CRC of every `(address, size)` range on the target.
    pub(super) fn compute_crcs(&mut self, ranges: &[(u64, u32)]) -> Result<Vec<u32>, FlashError> {
        let algo = self.flash_algorithm;
        let analyzer_address = algo
            .analyzer_address
            .ok_or(FlashError::AnalyzerNotSupported)?;

        let mut commands = Vec::with_capacity(ranges.len());
        for &(address, size) in ranges {
            let command = command(address, size).ok_or_else(|| {
                FlashError::InvalidFlashAlgorithm {
                    name: algo.name.clone(),
                    reason: format!(
                        "the analyzer cannot checksum {size:#x} bytes at {address:#010x}"
                    ),
                }
            })?;
            commands.push(command);
        }

        self.probe
            .write_32(algo.begin_data, &commands)
            .map_err(|source| FlashError::TargetWrite {
                address: algo.begin_data,
                length: commands.len() * 4,
                source,
            })?;

        let result = self.call_function_and_wait(
            &Registers {
                pc: Registers::value(analyzer_address)?,
                r0: Some(Registers::value(algo.begin_data)?),
                r1: Some(commands.len() as u32),
                r2: None,
                r3: None,
            },
            false,
            EntryPoint::Analyzer,
            None,
            Duration::from_millis(algo.timeouts.analyzer.into()),
        )?;

        if result != 0 {
            return Err(FlashError::AlgorithmError {
                entry_point: EntryPoint::Analyzer,
                address: None,
                error_code: result,
            });
        }

        self.probe
            .read_32(algo.begin_data, &mut commands)
            .map_err(|source| FlashError::TargetRead {
                address: algo.begin_data,
                length: commands.len() * 4,
                source,
            })?;

        Ok(commands)
    }

    /// Compares the CRC of every page on the target with the CRC of its data.
    pub(super) fn verify_pages(&mut self, pages: &[FlashPage]) -> Result<(), FlashError> {
        let page_size = self.region.page_size();
        // Keep the command list within one page of the data area.
        let batch = (page_size as usize / 4).max(1);

        for chunk in pages.chunks(batch) {
            let ranges: Vec<(u64, u32)> = chunk
                .iter()
                .map(|page| (page.address(), page.size()))
                .collect();

            let crcs = self.compute_crcs(&ranges)?;

            for (page, actual) in chunk.iter().zip(crcs) {
                let expected = crc32(page.data());
                if expected != actual {
                    tracing::warn!(
                        "CRC mismatch for the page at {:#010x}: {:#010x} != {:#010x}",
                        page.address(),
                        expected,
                        actual
                    );
                    return Err(FlashError::VerificationError {
                        address: page.address(),
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(0x0, 0x800 => Some(11); "first page")]
    #[test_case(0x1800, 0x800 => Some(11 | 3 << 16); "fourth page")]
    #[test_case(0x7_f800, 0x800 => Some(11 | 0xff << 16); "last page")]
    #[test_case(0x1000, 0x600 => None; "size not a power of two")]
    #[test_case(0x1400, 0x800 => None; "address not a multiple of size")]
    fn analyzer_command(address: u64, size: u32) -> Option<u32> {
        command(address, size)
    }

    #[test]
    fn crc_matches_the_ieee_check_value() {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
    }
}
